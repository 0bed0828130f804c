/// Implements `ToSql`/`FromSql` against `SMALLINT` for fieldless `#[repr(i16)]` enums.
///
/// The enum also needs `#[derive(AsExpression, FromSqlRow, TryFromPrimitive)]`
/// and `#[diesel(sql_type = SmallInt)]`.
macro_rules! smallint_enum {
    ($($ty:ty),+ $(,)?) => {$(
        impl ::diesel::serialize::ToSql<::diesel::sql_types::SmallInt, ::diesel::pg::Pg> for $ty
        where
            i16: ::diesel::serialize::ToSql<::diesel::sql_types::SmallInt, ::diesel::pg::Pg>,
        {
            fn to_sql<'b>(
                &'b self,
                out: &mut ::diesel::serialize::Output<'b, '_, ::diesel::pg::Pg>,
            ) -> ::diesel::serialize::Result {
                let v = *self as i16;
                <i16 as ::diesel::serialize::ToSql<::diesel::sql_types::SmallInt, ::diesel::pg::Pg>>::to_sql(
                    &v,
                    &mut out.reborrow(),
                )
            }
        }

        impl<DB> ::diesel::deserialize::FromSql<::diesel::sql_types::SmallInt, DB> for $ty
        where
            DB: ::diesel::backend::Backend,
            i16: ::diesel::deserialize::FromSql<::diesel::sql_types::SmallInt, DB>,
        {
            fn from_sql(bytes: DB::RawValue<'_>) -> ::diesel::deserialize::Result<Self> {
                let num = <i16 as ::diesel::deserialize::FromSql<
                    ::diesel::sql_types::SmallInt,
                    DB,
                >>::from_sql(bytes)?;
                Ok(Self::try_from(num)?)
            }
        }
    )+};
}

pub(crate) use smallint_enum;
