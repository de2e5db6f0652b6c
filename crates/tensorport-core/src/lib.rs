pub mod codec;
pub mod dtype;
pub mod error;
pub mod tensor;

pub use codec::*;
pub use dtype::*;
pub use error::*;
pub use tensor::*;
