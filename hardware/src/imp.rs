#[cfg(target_os = "espidf")]
mod esp;
#[cfg(not(target_os = "espidf"))]
pub mod sim;

#[cfg(target_os = "espidf")]
pub use esp::{free_heap_bytes, init_board};
#[cfg(not(target_os = "espidf"))]
pub use sim::{free_heap_bytes, init_board};
