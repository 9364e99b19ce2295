//! Glowcart
//!
//! Glowcart is the client-side cart layer of a headless storefront: it keeps
//! one consistent view of the shopping cart across anonymous local
//! persistence and the authenticated server cart, and broadcasts changes to
//! any number of display components.
//!
//! The [`cart::CartReconciler`] is the sole writer; display components read
//! its snapshot and subscribe to the [`notify::ChangeChannel`] instead of
//! holding their own copy of the cart.

pub mod cart;
pub mod ids;
pub mod notify;
pub mod prelude;
pub mod session;
