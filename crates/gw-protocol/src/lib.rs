//! # gw-protocol
//!
//! Text instruction framing shared by the gateway and its peers, plus the
//! status codes the gateway puts on the wire when it ends a tunnel.

pub mod instruction;
pub mod status;

pub use instruction::{CodecError, FrameError, Instruction, InstructionCodec};
pub use status::GatewayStatus;

/// Opcode of the periodic quota status frame.
pub const TIME_OPCODE: &str = "time";

/// Opcode of gateway-issued termination frames.
pub const ERROR_OPCODE: &str = "error";

/// First argument of an `error` frame that ends the tunnel.
pub const CLOSE_ARG: &str = "close";

/// Opcode reserved for messages between the client and the gateway itself.
/// Frames carrying it are never forwarded to the display server.
pub const INTERNAL_OPCODE: &str = "";

/// Maximum encoded instruction size accepted by the decoder (10 MB).
pub const MAX_INSTRUCTION_SIZE: usize = 10 * 1024 * 1024;
