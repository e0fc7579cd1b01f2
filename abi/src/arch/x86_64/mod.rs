pub mod exception;
