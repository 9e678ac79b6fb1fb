pub mod boombox;
pub mod task;
pub mod ui;
