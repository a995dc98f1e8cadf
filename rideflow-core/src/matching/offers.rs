//! Outstanding offers of this replica.
//!
//! Offers never leave memory. A crash loses them, but the ride request stays
//! un-acked at the broker and is matched again elsewhere.

use parking_lot::Mutex;
use rideflow_sdk::objects::Location;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub offer_id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// A driver's answer to an offer.
#[derive(Debug, Clone, PartialEq)]
pub enum OfferReply {
    Accepted { current_location: Option<Location> },
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting matcher.
    Delivered,
    /// The driver has an offer, but for another id or ride.
    Mismatched,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OfferConflict {
    #[error("driver already holds an offer")]
    DriverHasOffer,
    #[error("ride already has an outstanding offer")]
    RideHasOffer,
}

struct Pending {
    offer: Offer,
    reply: oneshot::Sender<OfferReply>,
}

#[derive(Default)]
struct Tables {
    by_driver: HashMap<Uuid, Pending>,
    /// ride id -> driver id
    by_ride: HashMap<Uuid, Uuid>,
}

/// At most one outstanding offer per driver and per ride.
#[derive(Default)]
pub struct OfferTable {
    tables: Mutex<Tables>,
}

impl OfferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `offer` and returns the receiver the matcher waits on.
    ///
    /// The receiver errors when the offer is withdrawn.
    pub fn open(&self, offer: Offer) -> Result<oneshot::Receiver<OfferReply>, OfferConflict> {
        let mut tables = self.tables.lock();
        if tables.by_driver.contains_key(&offer.driver_id) {
            return Err(OfferConflict::DriverHasOffer);
        }
        if tables.by_ride.contains_key(&offer.ride_id) {
            return Err(OfferConflict::RideHasOffer);
        }
        let (tx, rx) = oneshot::channel();
        tables.by_ride.insert(offer.ride_id, offer.driver_id);
        tables.by_driver.insert(
            offer.driver_id,
            Pending {
                offer,
                reply: tx,
            },
        );
        Ok(rx)
    }

    /// Routes a driver's reply to the matcher waiting on `offer_id`.
    pub fn resolve(&self, driver_id: Uuid, offer_id: Uuid, ride_id: Uuid, reply: OfferReply) -> Resolution {
        let pending = {
            let mut tables = self.tables.lock();
            match tables.by_driver.get(&driver_id) {
                None => return Resolution::NotFound,
                Some(p) if p.offer.offer_id != offer_id || p.offer.ride_id != ride_id => {
                    return Resolution::Mismatched;
                }
                Some(_) => {}
            }
            let Some(pending) = tables.by_driver.remove(&driver_id) else {
                return Resolution::NotFound;
            };
            tables.by_ride.remove(&pending.offer.ride_id);
            pending
        };
        match pending.reply.send(reply) {
            Ok(()) => Resolution::Delivered,
            // The matcher gave up between lookup and send.
            Err(_) => Resolution::NotFound,
        }
    }

    /// Removes the driver's offer if it is still `offer_id`.
    pub fn withdraw(&self, driver_id: Uuid, offer_id: Uuid) -> bool {
        let mut tables = self.tables.lock();
        match tables.by_driver.get(&driver_id) {
            Some(p) if p.offer.offer_id == offer_id => {
                if let Some(p) = tables.by_driver.remove(&driver_id) {
                    tables.by_ride.remove(&p.offer.ride_id);
                }
                true
            }
            _ => false,
        }
    }

    /// Removes whatever offer is outstanding for the ride.
    pub fn withdraw_ride(&self, ride_id: Uuid) -> Option<Offer> {
        let mut tables = self.tables.lock();
        let driver_id = tables.by_ride.remove(&ride_id)?;
        tables.by_driver.remove(&driver_id).map(|p| p.offer)
    }

    /// Removes the driver's offer, whatever it is.
    pub fn withdraw_driver(&self, driver_id: Uuid) -> Option<Offer> {
        let mut tables = self.tables.lock();
        let pending = tables.by_driver.remove(&driver_id)?;
        tables.by_ride.remove(&pending.offer.ride_id);
        Some(pending.offer)
    }

    pub fn has_offer(&self, driver_id: Uuid) -> bool {
        self.tables.lock().by_driver.contains_key(&driver_id)
    }

    pub fn offer_for_driver(&self, driver_id: Uuid) -> Option<Offer> {
        self.tables
            .lock()
            .by_driver
            .get(&driver_id)
            .map(|p| p.offer.clone())
    }

    pub fn outstanding(&self) -> usize {
        self.tables.lock().by_driver.len()
    }
}
