pub mod engagement;
pub mod icon;
pub mod path;
pub mod post;
pub mod session;
