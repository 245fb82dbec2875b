//! Data Access Layer
//!
//! This module contains all the functions for interacting with the PostgreSQL database.
//! It uses `sqlx` with connection pooling and embedded migrations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use voicerag_core::forms::{FormStore, UtilityFormRecord};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FormStore for Db {
    /// Inserts a completed Utility Assistance Application and returns its row id.
    async fn insert_utility_form(&self, form: &UtilityFormRecord) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO raleigh_utility_forms (
                county_case_number, social_security_number, date_of_birth,
                first_name, middle_initial, last_name, suffix,
                residence_address_street, residence_address_city, residence_address_zip,
                mailing_address_street, mailing_address_city, mailing_address_zip,
                phone_number, email_address,
                household_members, additional_income_sources, additional_family_members,
                are_you_currently_receiving, have_you_received_raleigh_water_assistance,
                most_recent_raleigh_water_assistance_date, are_you_renting_your_home_apartment,
                amount_due, service_current_on, city_of_raleigh_utility_account_number,
                name_on_account, would_you_like_to_register_to_vote,
                signature_applicant, signature_date
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
            )
            RETURNING id
            "#,
        )
        .bind(&form.county_case_number)
        .bind(&form.social_security_number)
        .bind(form.date_of_birth)
        .bind(&form.first_name)
        .bind(&form.middle_initial)
        .bind(&form.last_name)
        .bind(&form.suffix)
        .bind(&form.residence_address_street)
        .bind(&form.residence_address_city)
        .bind(&form.residence_address_zip)
        .bind(&form.mailing_address_street)
        .bind(&form.mailing_address_city)
        .bind(&form.mailing_address_zip)
        .bind(&form.phone_number)
        .bind(&form.email_address)
        .bind(&form.household_members)
        .bind(&form.additional_income_sources)
        .bind(&form.additional_family_members)
        .bind(&form.are_you_currently_receiving)
        .bind(form.have_you_received_raleigh_water_assistance)
        .bind(form.most_recent_raleigh_water_assistance_date)
        .bind(&form.are_you_renting_your_home_apartment)
        .bind(&form.amount_due)
        .bind(form.service_current_on)
        .bind(&form.city_of_raleigh_utility_account_number)
        .bind(&form.name_on_account)
        .bind(form.would_you_like_to_register_to_vote)
        .bind(&form.signature_applicant)
        .bind(form.signature_date)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert utility form")?;
        Ok(id)
    }
}
