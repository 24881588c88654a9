//! Built-in gestures.

pub mod kikee;
pub mod rising;

pub use kikee::{Kikee, KikeeParams, KIKEE};
pub use rising::{RisingWhistle, RisingWhistleParams, RISING_WHISTLE};
