use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A user's rating and review of one book
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Interaction {
    pub uid: Uuid,
    pub user_uid: Uuid,
    pub book_uid: Uuid,
    pub rate: Option<i16>,
    pub header: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload of `POST /interaction/rate`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RateRequest {
    /// Book being rated
    pub uid: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rate must be between 1 and 5"))]
    pub rate: i16,
    #[serde(default)]
    #[validate(length(max = 255, message = "Header must be at most 255 characters"))]
    pub header: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Filters of the interaction listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionQuery {
    /// Book whose interactions are listed
    pub uid: Option<Uuid>,
    /// Only interactions with a rate of at least this value
    pub rate: Option<i16>,
}

impl InteractionQuery {
    pub fn matches(&self, interaction: &Interaction) -> bool {
        if self.uid.is_some_and(|uid| interaction.book_uid != uid) {
            return false;
        }
        match self.rate {
            Some(min) => interaction.rate.is_some_and(|rate| rate >= min),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionLookup {
    pub uid: Uuid,
}

/// Mean of `rates` and how many there are; 0.0 for none
pub fn mean_rating(rates: &[i16]) -> (f64, i64) {
    if rates.is_empty() {
        return (0.0, 0);
    }
    let sum: f64 = rates.iter().map(|&r| f64::from(r)).sum();
    (sum / rates.len() as f64, rates.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_rating() {
        assert_eq!(mean_rating(&[]), (0.0, 0));
        assert_eq!(mean_rating(&[4, 5, 3]), (4.0, 3));
    }

    fn interaction(book_uid: Uuid, rate: Option<i16>) -> Interaction {
        let now = Utc::now();
        Interaction {
            uid: Uuid::new_v4(),
            user_uid: Uuid::new_v4(),
            book_uid,
            rate,
            header: String::new(),
            content: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_query_filters_by_book_and_rate() {
        let book = Uuid::new_v4();
        let query = InteractionQuery {
            uid: Some(book),
            rate: Some(4),
        };
        assert!(query.matches(&interaction(book, Some(5))));
        assert!(!query.matches(&interaction(book, Some(3))));
        assert!(!query.matches(&interaction(book, None)));
        assert!(!query.matches(&interaction(Uuid::new_v4(), Some(5))));
    }

    #[test]
    fn test_rate_request_bounds() {
        let request = RateRequest {
            uid: Uuid::new_v4(),
            rate: 6,
            header: None,
            content: None,
        };
        assert!(request.validate().is_err());
    }
}
