//! # Data Model
//!
//! Values, property maps and result rows. These types cross every boundary:
//! resource graph ↔ parser ↔ compiler ↔ queryable sources ↔ caller.
//!
//! This module is pure data with no I/O, state or async.

pub mod value;
pub mod property_map;
pub mod row;

pub use value::{CoercionError, Value, ValueType};
pub use property_map::{props, PropertyMap};
pub use row::{Related, Row};
