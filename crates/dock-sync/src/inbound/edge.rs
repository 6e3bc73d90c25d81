use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use dock_core::validation::{validate_price, validate_request};
use dock_core::{Clock, Reservation, DISPATCH_ACK};
use dock_db::{Database, ReservationRepository, SettingsRepository, MARKET_PRICE};

use super::ERROR_REPLY;
use crate::error::SyncResult;
use crate::protocol::{self, CloudDispatch};
use crate::server::RequestHandler;

/// What one dispatch changed on the edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub new_reservations: usize,
    /// Already known ids, ignored. Includes ids housekeeping has deleted.
    pub duplicates: usize,
    /// Stored as unfeasible straight away.
    pub invalid: usize,
}

/// Edge receiver for [`CloudDispatch`] messages.
pub struct EdgeInbound {
    db: Database,
    clock: Arc<dyn Clock>,
    spot_count: i64,
}

impl EdgeInbound {
    pub fn new(db: Database, clock: Arc<dyn Clock>, spot_count: i64) -> Self {
        EdgeInbound {
            db,
            clock,
            spot_count,
        }
    }

    /// Applies one dispatch in a single transaction.
    pub async fn apply(&self, dispatch: &CloudDispatch) -> SyncResult<DispatchOutcome> {
        let now = self.clock.now();
        let mut outcome = DispatchOutcome::default();
        let mut tx = self.db.begin().await?;

        match validate_price("current_market_price", dispatch.current_market_price) {
            Ok(()) => {
                SettingsRepository::set_real(&mut tx, MARKET_PRICE, dispatch.current_market_price, now)
                    .await?
            }
            Err(e) => warn!(error = %e, "Ignoring invalid market price"),
        }

        // Ids at or below the mark were received before, possibly decided
        // and cleaned up since.
        let highest_seen = ReservationRepository::highest_seen(&mut tx).await?;

        for (&id, incoming) in &dispatch.reservations {
            let reservation =
                Reservation::received(id, incoming.spot_id, incoming.duration, incoming.created_at, now);
            let known = id <= highest_seen
                || !ReservationRepository::insert_if_absent(&mut tx, &reservation).await?;
            if known {
                outcome.duplicates += 1;
                continue;
            }
            outcome.new_reservations += 1;

            if let Err(e) = validate_request(incoming.spot_id, incoming.duration, self.spot_count) {
                warn!(reservation_id = id, error = %e, "Invalid reservation request, marking unfeasible");
                ReservationRepository::mark_unfeasible(&mut tx, id, now).await?;
                outcome.invalid += 1;
            }
        }

        if let Some(&highest) = dispatch.reservations.keys().next_back() {
            ReservationRepository::record_seen(&mut tx, highest).await?;
        }
        tx.commit().await?;

        if outcome.new_reservations > 0 {
            info!(
                new = outcome.new_reservations,
                duplicates = outcome.duplicates,
                market_price = dispatch.current_market_price,
                "Received reservation requests"
            );
        } else {
            debug!(duplicates = outcome.duplicates, "Dispatch carried no new requests");
        }
        Ok(outcome)
    }
}

#[async_trait]
impl RequestHandler for EdgeInbound {
    async fn handle(&self, request: &str) -> String {
        let dispatch: CloudDispatch = match protocol::from_json(request) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                error!(error = %e, "Undecodable dispatch from cloud");
                return ERROR_REPLY.to_string();
            }
        };

        match self.apply(&dispatch).await {
            Ok(_) => DISPATCH_ACK.to_string(),
            Err(e) => {
                error!(error = %e, "Failed to apply dispatch");
                ERROR_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use dock_core::{ManualClock, ReservationStatus};
    use dock_db::housekeeping::clean_edge;
    use dock_db::{DbConfig, Schema};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn setup() -> (Database, EdgeInbound) {
        let (db, _clock, inbound) = setup_with_clock().await;
        (db, inbound)
    }

    async fn setup_with_clock() -> (Database, ManualClock, EdgeInbound) {
        let db = Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap();
        let clock = ManualClock::new(t0());
        let inbound = EdgeInbound::new(db.clone(), Arc::new(clock.clone()), 5);
        (db, clock, inbound)
    }

    fn body(price: f64, reservations: &str) -> String {
        format!(r#"{{"current_market_price": {price}, "reservations": {{{reservations}}}}}"#)
    }

    #[tokio::test]
    async fn test_dispatch_is_stored_once() {
        let (db, inbound) = setup().await;
        let request = body(
            0.5,
            r#""1": {"created_at": "2024-05-01T11:59:58Z", "spot_id": 3, "duration": 30}"#,
        );

        assert_eq!(inbound.handle(&request).await, "ok");
        assert_eq!(inbound.handle(&request).await, "ok");

        let mut conn = db.acquire().await.unwrap();
        let stored = ReservationRepository::get(&mut conn, 1).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Requested);
        assert_eq!(stored.received_at, t0());
        assert_eq!(
            SettingsRepository::get_real(&mut conn, MARKET_PRICE).await.unwrap(),
            Some(0.5)
        );
        assert_eq!(
            ReservationRepository::count_by_status(&mut conn, ReservationStatus::Requested)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_known_reservation_is_not_reopened() {
        let (db, inbound) = setup().await;
        let request = body(
            0.3,
            r#""4": {"created_at": "2024-05-01T11:59:58Z", "spot_id": 4, "duration": 30}"#,
        );
        inbound.handle(&request).await;
        {
            let mut conn = db.acquire().await.unwrap();
            ReservationRepository::mark_unfeasible(&mut conn, 4, t0()).await.unwrap();
        }

        let outcome = inbound
            .apply(&protocol::from_json(&request).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome.duplicates, 1);
        let mut conn = db.acquire().await.unwrap();
        let stored = ReservationRepository::get(&mut conn, 4).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Unfeasible);
    }

    #[tokio::test]
    async fn test_cleaned_up_reservation_is_not_reopened() {
        let (db, clock, inbound) = setup_with_clock().await;
        let request = body(
            0.3,
            r#""1": {"created_at": "2024-05-01T11:59:58Z", "spot_id": 4, "duration": 30}"#,
        );
        let dispatch: CloudDispatch = protocol::from_json(&request).unwrap();
        inbound.apply(&dispatch).await.unwrap();
        {
            let mut conn = db.acquire().await.unwrap();
            ReservationRepository::mark_unfeasible(&mut conn, 1, t0()).await.unwrap();
            ReservationRepository::mark_communicated(&mut conn, &[1]).await.unwrap();
        }

        clock.advance(chrono::Duration::seconds(301));
        {
            let mut conn = db.acquire().await.unwrap();
            let report = clean_edge(&mut conn, clock.now(), chrono::Duration::seconds(300))
                .await
                .unwrap();
            assert_eq!(report.reservations, 1);
        }

        // The cloud may still be resending the same dispatch.
        let outcome = inbound.apply(&dispatch).await.unwrap();
        assert_eq!(outcome.new_reservations, 0);
        assert_eq!(outcome.duplicates, 1);

        let mut conn = db.acquire().await.unwrap();
        assert!(ReservationRepository::get(&mut conn, 1).await.unwrap().is_none());
        assert!(ReservationRepository::pending_in_receipt_order(&mut conn)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_newer_ids_still_arrive_after_cleanup() {
        let (db, _clock, inbound) = setup_with_clock().await;
        let first = body(
            0.3,
            r#""1": {"created_at": "2024-05-01T11:59:58Z", "spot_id": 4, "duration": 30}"#,
        );
        let second = body(
            0.3,
            r#""2": {"created_at": "2024-05-01T11:59:59Z", "spot_id": 1, "duration": 20}"#,
        );

        inbound.handle(&first).await;
        let outcome = inbound
            .apply(&protocol::from_json(&second).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.new_reservations, 1);

        let mut conn = db.acquire().await.unwrap();
        assert_eq!(ReservationRepository::highest_seen(&mut conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_is_unfeasible_at_once() {
        let (db, inbound) = setup().await;
        let request = body(
            0.3,
            r#""2": {"created_at": "2024-05-01T11:59:58Z", "spot_id": 12, "duration": 30},
               "3": {"created_at": "2024-05-01T11:59:58Z", "spot_id": 1, "duration": 0}"#,
        );

        let outcome = inbound
            .apply(&protocol::from_json(&request).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome.invalid, 2);
        let mut conn = db.acquire().await.unwrap();
        assert_eq!(
            ReservationRepository::undelivered_decisions(&mut conn).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_garbage_gets_error_reply() {
        let (_db, inbound) = setup().await;
        assert_eq!(inbound.handle("0.42").await, ERROR_REPLY);
        assert_eq!(inbound.handle("{not json").await, ERROR_REPLY);
    }
}
