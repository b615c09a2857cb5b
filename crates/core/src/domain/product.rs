use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Horticulture,
    Dairy,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Horticulture => "horticulture",
            Self::Dairy => "dairy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "horticulture" => Some(Self::Horticulture),
            "dairy" => Some(Self::Dairy),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Amharic display name, matched during product search alongside `name`.
    pub local_name: Option<String>,
    pub category: Category,
    /// Unit of sale (kg, liter, crate, ...).
    pub unit: String,
    pub unit_price: Decimal,
    pub stock: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub supplier_id: UserId,
    pub image_ref: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Days until expiry as of `today`; `None` when the product does not
    /// expire or already has.
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        let expiry = self.expiry_date?;
        let remaining = (expiry - today).num_days();
        (remaining >= 0).then_some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{Category, Product, ProductId};
    use crate::domain::user::UserId;

    fn tomato(expiry: Option<NaiveDate>) -> Product {
        Product {
            id: ProductId("p-tomato".into()),
            name: "Tomato".into(),
            local_name: Some("ቲማቲም".into()),
            category: Category::Horticulture,
            unit: "kg".into(),
            unit_price: Decimal::new(5500, 2),
            stock: Decimal::from(40),
            expiry_date: expiry,
            supplier_id: UserId("s-1".into()),
            image_ref: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn days_until_expiry_counts_down() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let product = tomato(NaiveDate::from_ymd_opt(2026, 3, 12));
        assert_eq!(product.days_until_expiry(today), Some(2));
    }

    #[test]
    fn expired_or_non_perishable_products_have_no_countdown() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(tomato(None).days_until_expiry(today), None);
        assert_eq!(
            tomato(NaiveDate::from_ymd_opt(2026, 3, 1)).days_until_expiry(today),
            None
        );
    }
}
