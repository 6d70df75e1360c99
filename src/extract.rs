//! Extractors whose rejections render as [`ApiError`] envelopes instead of
//! axum's plain-text bodies.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query},
    http::request::Parts,
};
use axum_valid::{HasValidate, Valid, ValidRejection};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ApiError;

/// JSON request body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Urlencoded form body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Form), rejection(ApiError))]
pub struct ApiForm<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

impl<T> HasValidate for ApiQuery<T> {
    type Validate = T;

    fn get_validate(&self) -> &T {
        &self.0
    }
}

/// Query string deserialized into `T` and checked against its `Validate` rules.
#[derive(Debug)]
pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Valid::<ApiQuery<T>>::from_request_parts(parts, state).await {
            Ok(Valid(ApiQuery(query))) => Ok(ValidQuery(query)),
            Err(ValidRejection::Valid(errors)) => Err(ApiError::Validation(errors.into())),
            Err(ValidRejection::Inner(err)) => Err(err),
        }
    }
}
