use crate::errors::ApiError;
use crate::guard::{require_owner, AuthenticatedUser};
use crate::models::*;
use crate::store::Store;
use log::info;

pub const MIN_SCORE: i32 = 1;
pub const MAX_SCORE: i32 = 5;

/// Folds one more score into a running mean.
pub fn next_average(average: f64, count: i32, score: i32) -> f64 {
    (average * count as f64 + score as f64) / (count as f64 + 1.0)
}

pub struct RatingService;

impl RatingService {
    /// Rates the driver of a completed freight. Only the requester may rate,
    /// and only once per freight.
    pub fn submit_rating(
        caller: &AuthenticatedUser,
        freight_id: i32,
        request: SubmitRatingRequest,
        store: &dyn Store,
    ) -> Result<Rating, ApiError> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&request.rating) {
            return Err(ApiError::field(
                "rating",
                format!("Rating must be between {} and {}", MIN_SCORE, MAX_SCORE),
            ));
        }

        let freight = store
            .find_freight(freight_id)?
            .ok_or_else(|| ApiError::NotFoundError(format!("Freight {} not found", freight_id)))?;
        require_owner(caller, freight.user_id)?;
        if freight.status != FreightStatus::Completed {
            return Err(ApiError::InvalidStateTransition(format!(
                "cannot rate freight {} while it is {}",
                freight.id, freight.status
            )));
        }
        let driver_id = freight.driver_id.ok_or_else(|| {
            ApiError::InternalError(format!("Completed freight {} has no driver", freight.id))
        })?;
        if request.driver_id.map_or(false, |requested| requested != driver_id) {
            return Err(ApiError::field(
                "driver_id",
                "Rating must target the driver assigned to the freight",
            ));
        }
        if store.find_rating_by_freight(freight_id)?.is_some() {
            return Err(ApiError::DuplicateRating(freight_id));
        }
        if store.find_driver(driver_id)?.is_none() {
            return Err(ApiError::NotFoundError(format!("Driver {} not found", driver_id)));
        }

        let rating = store.insert_rating(NewRating {
            freight_id,
            user_id: caller.user_id,
            driver_id,
            rating: request.rating,
            comment: request
                .comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        })?;

        info!(
            "Driver {} rated {} for freight {}",
            driver_id, rating.rating, freight_id
        );
        Ok(rating)
    }

    pub fn list_for_driver(driver_id: i32, store: &dyn Store) -> Result<Vec<Rating>, ApiError> {
        if store.find_driver(driver_id)?.is_none() {
            return Err(ApiError::NotFoundError(format!("Driver {} not found", driver_id)));
        }
        store.list_ratings_for_driver(driver_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{driver, freight_request, user};
    use crate::engine::FreightService;
    use crate::store::MemoryStore;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn completed_freight(store: &MemoryStore, requester: &AuthenticatedUser, driver: &AuthenticatedUser) -> Freight {
        let f = FreightService::request_freight(requester, freight_request(dec!(50)), store).unwrap();
        FreightService::accept_freight(driver, f.id, store).unwrap();
        FreightService::complete_freight(driver, f.id, store).unwrap()
    }

    fn rate(score: i32) -> SubmitRatingRequest {
        SubmitRatingRequest {
            driver_id: None,
            rating: score,
            comment: Some("  on time  ".to_string()),
        }
    }

    #[rstest]
    #[case(0.0, 0, 4, 4.0)]
    #[case(4.0, 1, 2, 3.0)]
    #[case(3.0, 2, 5, 11.0 / 3.0)]
    fn incremental_mean(#[case] avg: f64, #[case] count: i32, #[case] score: i32, #[case] expected: f64) {
        assert!((next_average(avg, count, score) - expected).abs() < 1e-12);
    }

    #[test]
    fn aggregate_follows_each_rating() {
        let store = MemoryStore::new();
        let requester = user(&store, "ana", Role::User);
        let (d1, d1_row) = driver(&store, "d1");

        let first = completed_freight(&store, &requester, &d1);
        RatingService::submit_rating(&requester, first.id, rate(4), &store).unwrap();
        let row = store.find_driver(d1_row.id).unwrap().unwrap();
        assert_eq!((row.average_rating, row.total_ratings), (4.0, 1));

        let second = completed_freight(&store, &requester, &d1);
        let rating = RatingService::submit_rating(&requester, second.id, rate(2), &store).unwrap();
        assert_eq!(rating.comment.as_deref(), Some("on time"));
        let row = store.find_driver(d1_row.id).unwrap().unwrap();
        assert_eq!((row.average_rating, row.total_ratings), (3.0, 2));
    }

    #[test]
    fn second_rating_is_duplicate() {
        let store = MemoryStore::new();
        let requester = user(&store, "ana", Role::User);
        let (d1, d1_row) = driver(&store, "d1");
        let freight = completed_freight(&store, &requester, &d1);

        RatingService::submit_rating(&requester, freight.id, rate(5), &store).unwrap();
        let err = RatingService::submit_rating(&requester, freight.id, rate(1), &store).unwrap_err();
        assert_eq!(err, ApiError::DuplicateRating(freight.id));
        let row = store.find_driver(d1_row.id).unwrap().unwrap();
        assert_eq!((row.average_rating, row.total_ratings), (5.0, 1));
    }

    #[test]
    fn only_requester_rates_completed_freight() {
        let store = MemoryStore::new();
        let requester = user(&store, "ana", Role::User);
        let stranger = user(&store, "bia", Role::User);
        let (d1, _) = driver(&store, "d1");

        let open = FreightService::request_freight(&requester, freight_request(dec!(50)), &store).unwrap();
        let err = RatingService::submit_rating(&requester, open.id, rate(5), &store).unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition(_)));

        let done = completed_freight(&store, &requester, &d1);
        let err = RatingService::submit_rating(&stranger, done.id, rate(5), &store).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let err = RatingService::submit_rating(&requester, 4242, rate(5), &store).unwrap_err();
        assert!(matches!(err, ApiError::NotFoundError(_)));
    }

    #[rstest]
    #[case(0)]
    #[case(6)]
    fn score_out_of_range(#[case] score: i32) {
        let store = MemoryStore::new();
        let requester = user(&store, "ana", Role::User);
        let err = RatingService::submit_rating(&requester, 1, rate(score), &store).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError { .. }));
    }

    #[test]
    fn rating_must_target_assigned_driver() {
        let store = MemoryStore::new();
        let requester = user(&store, "ana", Role::User);
        let (d1, _) = driver(&store, "d1");
        let (_, d2_row) = driver(&store, "d2");
        let freight = completed_freight(&store, &requester, &d1);

        let mut request = rate(5);
        request.driver_id = Some(d2_row.id);
        let err = RatingService::submit_rating(&requester, freight.id, request, &store).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError { .. }));
        assert!(store.list_ratings_for_driver(d2_row.id).unwrap().is_empty());
    }
}
