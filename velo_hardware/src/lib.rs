//! Adapters for the external collaborators of the control core.
//!
//! - `net`: TCP byte-stream transport (client connector, server acceptor, link)
//! - `sim`: simulated DC motor + quadrature encoder sharing one rotor model
pub mod error;
pub mod net;
pub mod sim;

pub use net::{TcpAcceptor, TcpConnector, TcpLink};
pub use sim::{SimEncoder, SimMotor, SimPlant};
