//! Cart reconciler.
//!
//! The single decision point for which backing store is authoritative. Guest
//! sessions route every mutation to the local store; authenticated sessions
//! route to the remote client and treat it as the sole source of truth.
//! Display components never hold a copy of the cart: they subscribe to the
//! change channel and re-read the snapshot when notified.

use jiff::Timestamp;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::{
    cart::{
        errors::CartError,
        local::LocalCartStore,
        models::{
            Cart, CartLine, CheckoutHandoff, CheckoutOutcome, LineDisplay, LineUpdate,
            LoginReport, NewLine, SelectionSet,
        },
        remote::{RemoteCart, RemoteCartLine},
    },
    ids::{LineId, ProductId, VariationId},
    notify::{ChangeChannel, Handler, SubscriptionId},
    session::{Credentials, Session},
};

/// Orchestrates the local store, the remote client, and the change channel
/// into one consistent cart view.
///
/// Single-writer by construction: mutations take `&mut self`, and a per-line
/// in-flight guard rejects a second mutation for a pair whose first is still
/// waiting on the backend.
pub struct CartReconciler<R: RemoteCart> {
    local: LocalCartStore,
    remote: R,
    session: Session,
    snapshot: Cart,
    selection: SelectionSet,
    handoff: Option<CheckoutHandoff>,
    in_flight: FxHashSet<(ProductId, VariationId)>,
    channel: ChangeChannel,
}

impl<R: RemoteCart> std::fmt::Debug for CartReconciler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartReconciler")
            .field("session", &self.session)
            .field("snapshot", &self.snapshot)
            .field("selection", &self.selection)
            .field("handoff", &self.handoff)
            .field("in_flight", &self.in_flight)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl<R: RemoteCart> CartReconciler<R> {
    /// Create a reconciler in guest mode, recovering any persisted guest
    /// cart, checkout selection, and outstanding handoff.
    pub fn new(local: LocalCartStore, remote: R) -> Self {
        let snapshot = Cart::from_lines(local.read_lines());

        let mut selection = local.read_selection();
        selection.prune(&snapshot);

        let handoff = local.read_handoff();

        Self {
            local,
            remote,
            session: Session::Guest,
            snapshot,
            selection,
            handoff,
            in_flight: FxHashSet::default(),
            channel: ChangeChannel::new(),
        }
    }

    /// The current cart snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Cart {
        &self.snapshot
    }

    /// The current checkout selection.
    #[must_use]
    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// The outstanding checkout handoff, if any.
    #[must_use]
    pub fn handoff(&self) -> Option<&CheckoutHandoff> {
        self.handoff.as_ref()
    }

    /// The current session mode.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Register a display component for change notifications.
    pub fn subscribe(&mut self, handler: Handler) -> SubscriptionId {
        self.channel.subscribe(handler)
    }

    /// Deregister a display component.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.channel.unsubscribe(id)
    }

    /// Add a variation to the cart. If a line for the same
    /// `(product, variation)` pair already exists its quantity is
    /// incremented; no duplicate line is ever created. Quantities below 1
    /// are clamped to 1.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if persistence fails or a mutation for the same
    /// pair is already in flight. On error the snapshot is left untouched.
    #[tracing::instrument(
        name = "cart.reconciler.add_line",
        skip(self, line),
        fields(product = %line.product_id, variation = %line.variation_id),
        err
    )]
    pub async fn add_line(&mut self, line: NewLine) -> Result<(), CartError> {
        let pair = (line.product_id, line.variation_id);

        self.begin_flight(pair)?;
        let result = self.add_line_inner(line).await;
        self.end_flight(pair);

        result
    }

    async fn add_line_inner(&mut self, line: NewLine) -> Result<(), CartError> {
        let quantity = line.quantity.max(1);

        let Some(auth) = self.session.credentials().cloned() else {
            let mut lines = self.snapshot.lines().to_vec();

            if let Some(existing) = lines
                .iter_mut()
                .find(|candidate| candidate.pair() == (line.product_id, line.variation_id))
            {
                existing.quantity = existing.quantity.saturating_add(quantity);
                existing.revision += 1;
            } else {
                lines.push(CartLine {
                    line_id: None,
                    product_id: line.product_id,
                    variation_id: line.variation_id,
                    quantity,
                    unit_price: line.pricing.effective(),
                    display: line.display,
                    revision: 1,
                    added_at: Timestamp::now(),
                });
            }

            self.local.write_lines(&lines)?;

            return self.commit(Cart::from_lines(lines));
        };

        let issued = self.revision_of(line.product_id, line.variation_id);

        let record = self
            .remote
            .add(&auth, line.product_id, line.variation_id, quantity)
            .await?;

        if self.revision_of(line.product_id, line.variation_id) != issued {
            debug!("discarding stale add response");
            return Ok(());
        }

        let projected = self.project(record, issued + 1, Some(line.display));
        let mut cart = self.snapshot.clone();
        cart.apply(projected);

        self.commit(cart)
    }

    /// Update the line for a pair: quantity, a variation switch, or both.
    /// A requested quantity at or below 0 is clamped to 1; an update never
    /// implicitly deletes a line. A variation switch preserves the line's
    /// identity and position rather than removing and re-adding it.
    ///
    /// A line that no longer exists (raced with another tab or session) is
    /// treated as a no-op: the snapshot is refreshed and no error surfaces.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if persistence fails or a mutation for the same
    /// pair is already in flight. On error the snapshot is left untouched.
    #[tracing::instrument(
        name = "cart.reconciler.update_line",
        skip(self, update),
        fields(product = %product, variation = %variation),
        err
    )]
    pub async fn update_line(
        &mut self,
        product: ProductId,
        variation: VariationId,
        update: LineUpdate,
    ) -> Result<(), CartError> {
        let pair = (product, variation);

        self.begin_flight(pair)?;
        let result = self.update_line_inner(product, variation, update).await;
        self.end_flight(pair);

        result
    }

    async fn update_line_inner(
        &mut self,
        product: ProductId,
        variation: VariationId,
        update: LineUpdate,
    ) -> Result<(), CartError> {
        let Some(existing) = self.snapshot.find(product, variation).cloned() else {
            debug!("update target missing; refreshing snapshot");
            return self.refresh_after_miss().await;
        };

        let quantity = update
            .quantity
            .map_or(existing.quantity, clamp_quantity);

        let (target_variation, unit_price) = match &update.variation {
            Some(change) => (change.variation_id, change.pricing.effective()),
            None => (existing.variation_id, existing.unit_price),
        };

        let Some(auth) = self.session.credentials().cloned() else {
            let mut cart = self.snapshot.clone();

            // Switching onto a pair that already has its own line folds the
            // two together to keep the pair-uniqueness invariant.
            let folded = if target_variation == variation {
                0
            } else {
                cart.remove(product, target_variation)
                    .map_or(0, |other| other.quantity)
            };

            let Some(line) = cart.find_mut(product, variation) else {
                return self.refresh_after_miss().await;
            };

            line.quantity = quantity.saturating_add(folded);
            line.variation_id = target_variation;
            line.unit_price = unit_price;
            line.revision += 1;

            self.local.write_lines(cart.lines())?;

            return self.commit(cart);
        };

        let issued = existing.revision;

        let record = match self
            .remote
            .update(&auth, product, target_variation, quantity)
            .await
        {
            Ok(record) => record,
            Err(CartError::NotFound) => {
                debug!("update target gone server-side; refreshing snapshot");
                return self.refresh_after_miss().await;
            }
            Err(error) => return Err(error),
        };

        if self.revision_of(product, variation) != issued {
            debug!("discarding stale update response");
            return Ok(());
        }

        let mut projected = self.project(record, issued + 1, None);
        projected.display = existing.display;
        projected.added_at = existing.added_at;

        let mut cart = self.snapshot.clone();

        if target_variation != variation {
            cart.remove(product, variation);
        }

        cart.apply(projected);

        self.commit(cart)
    }

    /// Remove the line for a pair. Guest lines are identified by the pair;
    /// authenticated lines by their server-assigned id. A line that is
    /// already gone is treated as a no-op with a snapshot refresh.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if persistence fails or a mutation for the same
    /// pair is already in flight. On error the snapshot is left untouched.
    #[tracing::instrument(
        name = "cart.reconciler.remove_line",
        skip(self),
        fields(product = %product, variation = %variation),
        err
    )]
    pub async fn remove_line(
        &mut self,
        product: ProductId,
        variation: VariationId,
    ) -> Result<(), CartError> {
        let pair = (product, variation);

        self.begin_flight(pair)?;
        let result = self.remove_line_inner(product, variation).await;
        self.end_flight(pair);

        result
    }

    async fn remove_line_inner(
        &mut self,
        product: ProductId,
        variation: VariationId,
    ) -> Result<(), CartError> {
        let Some(existing) = self.snapshot.find(product, variation).cloned() else {
            debug!("remove target missing; refreshing snapshot");
            return self.refresh_after_miss().await;
        };

        let Some(auth) = self.session.credentials().cloned() else {
            let mut cart = self.snapshot.clone();
            cart.remove(product, variation);

            self.local.write_lines(cart.lines())?;

            return self.commit(cart);
        };

        match self.remove_remote_line(&auth, &existing).await {
            Ok(()) | Err(CartError::NotFound) => {
                let mut cart = self.snapshot.clone();
                cart.remove(product, variation);

                self.commit(cart)
            }
            Err(error) => Err(error),
        }
    }

    async fn remove_remote_line(
        &self,
        auth: &Credentials,
        line: &CartLine,
    ) -> Result<(), CartError> {
        let id: LineId = line.line_id.ok_or(CartError::NotFound)?;

        self.remote.remove(auth, id).await
    }

    /// Mark a product's lines for checkout. The product must currently have
    /// a line in the cart.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no line references the product, or a storage
    /// error if the selection cannot be persisted.
    pub fn select(&mut self, product: ProductId) -> Result<(), CartError> {
        if !self.snapshot.contains_product(product) {
            return Err(CartError::NotFound);
        }

        self.selection.select(product);
        self.local.write_selection(&self.selection)?;
        self.channel.publish();

        Ok(())
    }

    /// Unmark a product for checkout.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the selection cannot be persisted.
    pub fn deselect(&mut self, product: ProductId) -> Result<(), CartError> {
        if self.selection.deselect(product) {
            self.local.write_selection(&self.selection)?;
            self.channel.publish();
        }

        Ok(())
    }

    /// Hand the selected lines off to checkout.
    ///
    /// Deep-copies the lines of every selected product into an immutable
    /// [`CheckoutHandoff`], removes them from the cart, and clears them from
    /// the selection. Later cart mutations do not affect the handoff.
    ///
    /// The handoff is transactional per line: only lines whose removal from
    /// the backing store succeeded are finalized into the handoff; the rest
    /// stay in the cart (and in the selection) and are reported in
    /// [`CheckoutOutcome::unmoved`] so the caller can retry.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if nothing is selected, or a storage error if
    /// the guest cart cannot be rewritten. On error nothing is moved.
    #[tracing::instrument(name = "cart.reconciler.begin_checkout", skip(self), err)]
    pub async fn begin_checkout(&mut self) -> Result<CheckoutOutcome, CartError> {
        if self.selection.is_empty() {
            return Err(CartError::Validation);
        }

        let selected: Vec<CartLine> = self
            .snapshot
            .iter()
            .filter(|line| self.selection.contains(line.product_id))
            .cloned()
            .collect();

        let mut moved = Vec::with_capacity(selected.len());
        let mut unmoved = Vec::new();

        if let Some(auth) = self.session.credentials().cloned() {
            for line in selected {
                match self.remove_remote_line(&auth, &line).await {
                    // A line already gone server-side is no longer in the
                    // cart either way; keep the copy.
                    Ok(()) | Err(CartError::NotFound) => moved.push(line),
                    Err(error) => {
                        warn!(
                            product = %line.product_id,
                            %error,
                            "could not move line to checkout"
                        );
                        unmoved.push(line);
                    }
                }
            }
        } else {
            let remaining: Vec<CartLine> = self
                .snapshot
                .iter()
                .filter(|line| !self.selection.contains(line.product_id))
                .cloned()
                .collect();

            self.local.write_lines(&remaining)?;

            moved = selected;
        }

        let handoff = CheckoutHandoff {
            lines: moved,
            created_at: Timestamp::now(),
        };

        if let Err(error) = self.local.write_handoff(&handoff) {
            // The lines are already out of the cart; losing the handoff too
            // would double the damage. Keep it in memory and let checkout
            // proceed from there.
            warn!(%error, "could not persist checkout handoff");
        }

        self.handoff = Some(handoff.clone());

        let mut cart = self.snapshot.clone();

        for line in &handoff.lines {
            cart.remove(line.product_id, line.variation_id);
        }

        info!(
            moved = handoff.lines.len(),
            unmoved = unmoved.len(),
            "handed cart lines off to checkout"
        );

        self.commit(cart)?;

        Ok(CheckoutOutcome { handoff, unmoved })
    }

    /// Discard the outstanding checkout handoff, after the order was placed
    /// or abandoned.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the persisted handoff cannot be removed.
    pub fn clear_handoff(&mut self) -> Result<(), CartError> {
        self.local.clear_handoff()?;
        self.handoff = None;

        Ok(())
    }

    /// Transition guest → authenticated.
    ///
    /// Guest cart contents are merged into the server cart rather than
    /// silently discarded: every guest line is pushed via the remote client,
    /// then cleared from local persistence. Lines that fail to push stay
    /// local and are reported in the [`LoginReport`].
    ///
    /// # Errors
    ///
    /// Returns `Validation` if already authenticated, or the remote error if
    /// the server cart cannot be listed (nothing is changed in that case).
    #[tracing::instrument(
        name = "cart.reconciler.login",
        skip(self, credentials),
        fields(customer = %credentials.customer),
        err
    )]
    pub async fn login(&mut self, credentials: Credentials) -> Result<LoginReport, CartError> {
        if self.session.is_authenticated() {
            return Err(CartError::Validation);
        }

        let mut cart = Cart::default();

        for record in self.remote.list(&credentials).await? {
            cart.apply(record.into_line(0));
        }

        let mut merged = 0;
        let mut failed = Vec::new();

        for line in self.local.read_lines() {
            match self
                .remote
                .add(&credentials, line.product_id, line.variation_id, line.quantity)
                .await
            {
                Ok(record) => {
                    let mut projected = record.into_line(0);
                    projected.display = line.display;
                    cart.apply(projected);
                    merged += 1;
                }
                Err(error) => {
                    warn!(
                        product = %line.product_id,
                        %error,
                        "could not merge guest line into server cart"
                    );
                    failed.push(line);
                }
            }
        }

        // Pushed lines must not resurrect on the next guest session; lines
        // that failed to push stay behind for it.
        self.local.write_lines(&failed)?;

        self.session = Session::Authenticated(credentials);

        info!(
            merged,
            failed = failed.len(),
            "switched cart source of truth to server"
        );

        self.commit(cart)?;

        Ok(LoginReport { merged, failed })
    }

    /// Transition authenticated → guest: clear local persistence and the
    /// in-memory state entirely. The server-side cart remains the server's
    /// concern.
    ///
    /// # Errors
    ///
    /// Returns a storage error if local persistence cannot be cleared.
    #[tracing::instrument(name = "cart.reconciler.logout", skip(self), err)]
    pub fn logout(&mut self) -> Result<(), CartError> {
        self.local.clear()?;

        self.session = Session::Guest;
        self.snapshot = Cart::default();
        self.selection = SelectionSet::new();
        self.handoff = None;

        info!("cleared cart state on logout");

        self.channel.publish();

        Ok(())
    }

    /// Re-read the cart from the authoritative store and publish.
    ///
    /// In authenticated mode, a line mutated locally after this refresh was
    /// issued keeps its local state; the stale server copy is discarded for
    /// that line.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the server cart cannot be listed.
    #[tracing::instrument(name = "cart.reconciler.refresh", skip(self), err)]
    pub async fn refresh(&mut self) -> Result<(), CartError> {
        let Some(auth) = self.session.credentials().cloned() else {
            let cart = Cart::from_lines(self.local.read_lines());
            return self.commit(cart);
        };

        let issued: FxHashMap<(ProductId, VariationId), u64> = self
            .snapshot
            .iter()
            .map(|line| (line.pair(), line.revision))
            .collect();

        let records = self.remote.list(&auth).await?;

        let mut cart = Cart::default();

        for record in records {
            let pair = (record.product_id, record.product_variation_id);
            let issued_revision = issued.get(&pair).copied().unwrap_or(0);

            if let Some(prior) = self.snapshot.find(pair.0, pair.1) {
                if prior.revision > issued_revision {
                    debug!(product = %pair.0, "keeping locally newer line over stale refresh");
                    cart.apply(prior.clone());
                    continue;
                }

                let mut projected = record.into_line(prior.revision);
                projected.display = prior.display.clone();
                projected.added_at = prior.added_at;
                cart.apply(projected);
            } else {
                cart.apply(record.into_line(0));
            }
        }

        self.commit(cart)
    }

    /// Project a backend record onto the snapshot, preserving locally-held
    /// display details the wire format does not carry.
    fn project(
        &self,
        record: RemoteCartLine,
        revision: u64,
        display: Option<LineDisplay>,
    ) -> CartLine {
        let prior = self
            .snapshot
            .find(record.product_id, record.product_variation_id)
            .cloned();

        let mut line = record.into_line(revision);

        if let Some(display) = display {
            line.display = display;
        } else if let Some(prior) = &prior {
            line.display = prior.display.clone();
        }

        if let Some(prior) = prior {
            line.added_at = prior.added_at;
        }

        line
    }

    /// Commit a new snapshot: prune and persist the selection, then notify
    /// subscribers. The prior snapshot stays untouched until this point, so
    /// a failed mutation is never partially observable.
    fn commit(&mut self, cart: Cart) -> Result<(), CartError> {
        self.snapshot = cart;

        if self.selection.prune(&self.snapshot) {
            self.local.write_selection(&self.selection)?;
        }

        self.channel.publish();

        Ok(())
    }

    /// Best-effort refresh after a mutation targeted a line that no longer
    /// exists. The miss itself is not an error.
    async fn refresh_after_miss(&mut self) -> Result<(), CartError> {
        if let Err(error) = self.refresh().await {
            warn!(%error, "snapshot refresh after missing line failed");
        }

        Ok(())
    }

    fn revision_of(&self, product: ProductId, variation: VariationId) -> u64 {
        self.snapshot
            .find(product, variation)
            .map_or(0, |line| line.revision)
    }

    fn begin_flight(&mut self, pair: (ProductId, VariationId)) -> Result<(), CartError> {
        if !self.in_flight.insert(pair) {
            return Err(CartError::OperationInFlight);
        }

        Ok(())
    }

    fn end_flight(&mut self, pair: (ProductId, VariationId)) {
        self.in_flight.remove(&pair);
    }
}

fn clamp_quantity(requested: i64) -> u32 {
    if requested < 1 {
        1
    } else {
        u32::try_from(requested).unwrap_or(u32::MAX)
    }
}
