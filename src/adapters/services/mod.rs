pub mod csgo;
pub mod robotstxt;
pub mod token_protected;

pub use csgo::CsgoService;
pub use robotstxt::RobotsTxtService;
pub use token_protected::TokenProtectedService;
