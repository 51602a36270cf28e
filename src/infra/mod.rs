pub mod db;
pub mod memory;
pub mod storage;
pub mod store;
pub mod widgets;
