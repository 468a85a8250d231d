mod maintenance;

pub use maintenance::*;
