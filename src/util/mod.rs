pub mod duration;
pub mod fs;
pub mod template;
pub mod text;
