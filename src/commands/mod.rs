pub mod health;
pub mod tick_stream;
