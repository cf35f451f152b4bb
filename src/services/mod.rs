//! Background services run by `serve`.

pub mod operation_scanner;

pub use operation_scanner::OperationScanner;
