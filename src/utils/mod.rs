pub mod dfri;
pub mod smoother;
