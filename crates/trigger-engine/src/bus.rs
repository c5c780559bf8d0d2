//! The delivery capability the coordinator writes values through.

use knx_bus::{DatapointType, DptValue, GroupAddress};

use crate::error::BusError;

/// Anything that can put a typed value onto a group address.
pub trait GroupBus {
    fn send(
        &mut self,
        address: GroupAddress,
        dpt: DatapointType,
        value: &DptValue,
    ) -> Result<(), BusError>;
}

impl<B: GroupBus + ?Sized> GroupBus for &mut B {
    fn send(
        &mut self,
        address: GroupAddress,
        dpt: DatapointType,
        value: &DptValue,
    ) -> Result<(), BusError> {
        (**self).send(address, dpt, value)
    }
}
