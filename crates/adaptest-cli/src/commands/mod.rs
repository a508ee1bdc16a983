pub mod init;
pub mod replay;
pub mod simulate;
pub mod validate;
