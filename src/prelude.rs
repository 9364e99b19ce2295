//! Convenience re-exports for storefront consumers.

pub use crate::{
    cart::{
        CartApiConfig, CartError, CartReconciler, HttpCartClient, LocalCartStore, RemoteCart,
        models::{
            Cart, CartLine, CheckoutHandoff, CheckoutOutcome, LineDisplay, LineUpdate,
            LoginReport, NewLine, SelectionSet, VariationChange, VariationPricing,
        },
    },
    ids::{CustomerId, LineId, ProductId, VariationId},
    notify::{ChangeChannel, Handler, SubscriptionId},
    session::{BearerToken, Credentials, Session},
};
