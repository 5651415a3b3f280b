pub mod remote;
pub mod retry;
