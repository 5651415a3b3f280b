pub mod descriptor;
pub mod fingerprint;
pub mod lifecycle;
pub mod status;
pub mod url;
pub mod view;
