//! [`GroupBus`] over a KNXnet/IP connection.

use knx_bus::{ConnectionConfig, DatapointType, DptValue, GroupAddress, KnxClient, KnxError};
use trigger_engine::{BusError, GroupBus};

pub struct KnxBus {
    client: KnxClient,
}

impl KnxBus {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            client: KnxClient::new(config),
        }
    }
}

impl GroupBus for KnxBus {
    fn send(
        &mut self,
        address: GroupAddress,
        dpt: DatapointType,
        value: &DptValue,
    ) -> Result<(), BusError> {
        let payload = dpt.encode(value).map_err(|e| BusError::Rejected(e.to_string()))?;
        self.client.group_write(address, &payload).map_err(to_bus_error)
    }
}

fn to_bus_error(e: KnxError) -> BusError {
    match e {
        KnxError::NotConnected(reason) => BusError::NotConnected(reason),
        KnxError::Io(io) => BusError::NotConnected(io.to_string()),
        KnxError::Timeout(what) => BusError::Timeout(what.to_string()),
        other => BusError::Rejected(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        assert_eq!(
            to_bus_error(KnxError::NotConnected("refused".into())),
            BusError::NotConnected("refused".into())
        );
        assert_eq!(
            to_bus_error(KnxError::Timeout("L_Data.con")),
            BusError::Timeout("L_Data.con".into())
        );
        assert!(matches!(
            to_bus_error(KnxError::Rejected("negative L_Data.con".into())),
            BusError::Rejected(_)
        ));
    }
}
