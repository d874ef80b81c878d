pub mod appointment;
pub mod record;
pub mod session;
pub mod slot;
