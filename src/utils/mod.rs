pub mod feature_flags;
pub mod quote;
pub mod random;
pub mod template;
pub mod text;
