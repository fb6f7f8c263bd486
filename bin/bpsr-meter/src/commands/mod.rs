pub mod live;
pub mod replay;
