pub mod mysql;

pub use mysql::{Storage, UploadPlan};
