pub mod discrete;
pub mod widgets;
