pub mod composer;
pub mod engagement;
pub mod error;
pub mod identity;
pub mod modal;
pub mod posts;
pub mod presence;
pub mod subscription;
pub mod views;
