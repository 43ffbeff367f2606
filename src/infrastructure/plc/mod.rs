pub mod modbus_transport;
pub mod mock_transport;

pub use modbus_transport::ModbusPlcTransport;
pub use mock_transport::MockPlcTransport;
