//! Three-way split of a gross amount into platform commission, gateway fee
//! and organizer payout. Pure functions over integer minor units.

pub mod calculator;

pub use calculator::{compute_split, platform_revenue_split, Split, MAX_COMMISSION_BPS};
