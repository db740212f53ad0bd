pub mod fetch_use_case;
pub mod filter_use_case;
pub mod ports;
