mod setups;
mod steps;
mod topup_world;

pub use topup_world::TopupWorld;
