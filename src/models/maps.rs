use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    serialize::{self, Output, ToSql},
    sql_types::Jsonb,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::bracket::series::MapResult;

/// Per-map results of a match, stored as a JSONB array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct MapsData(pub Vec<MapResult>);

impl ToSql<Jsonb, Pg> for MapsData {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let value = serde_json::to_value(&self.0)?;
        <serde_json::Value as ToSql<Jsonb, Pg>>::to_sql(&value, &mut out.reborrow())
    }
}

impl FromSql<Jsonb, Pg> for MapsData {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = <serde_json::Value as FromSql<Jsonb, Pg>>::from_sql(bytes)?;
        Ok(Self(serde_json::from_value(value)?))
    }
}

impl From<Vec<MapResult>> for MapsData {
    fn from(maps: Vec<MapResult>) -> Self {
        Self(maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::series::MapStatus;

    #[test]
    fn stored_maps_fill_missing_fields() {
        let maps: MapsData = serde_json::from_str(
            r#"[{"name": "Tokyo 2099: Shin-Shibuya", "team1Score": 2, "status": "completed"}]"#,
        )
        .unwrap();
        assert_eq!(maps.0.len(), 1);
        assert_eq!(maps.0[0].team2_score, 0);
        assert_eq!(maps.0[0].status, MapStatus::Completed);
        assert!(maps.0[0].team1_composition.is_empty());
    }
}
