//! Utility Assistance Application tools.
//!
//! `fill_out_utility_form` lets the model assemble the City of Raleigh
//! Utility Assistance Application field by field; `save_utility_form`
//! persists the completed form through a [`FormStore`].

use crate::{
    registry::{ToolError, ToolRegistry},
    tool::{ToolArgs, ToolHandler, ToolResult, ToolSchema},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A member of the applicant's household, including the applicant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HouseholdMember {
    pub name: String,
    pub date_of_birth: String,
    pub social_security_number: String,
    pub employer: String,
    /// Wages, salary, tips, bonus, etc.
    pub income_description: String,
    /// How often paid (weekly, biweekly, monthly...)
    pub income_frequency: String,
    pub date_last_received: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IncomeSource {
    #[schemars(extend("enum" = [
        "Work First Benefits", "SSI Benefits", "Social Security Benefits",
        "Veterans Benefits", "Unemployment Benefits", "Pandemic Unemployment",
        "Child Support", "Worker's Compensation", "Severance Pay",
        "Retirement/Pension", "Armed Forces/Military Pay", "Self-employment",
        "Adoption Assistance Payments", "Welfare Assistance", "Rental Income",
        "Interest/Dividends", "Independent Contractor", "Re-occurring Cash Gifts",
        "Asset Income", "Other"
    ]))]
    pub source_type: String,
    /// Which household member?
    pub who: String,
    pub amount: String,
    pub date_last_received: String,
}

/// Check if you are currently receiving these assistance programs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AssistancePrograms {
    /// CIP / LIEAP
    pub energy_assistance_cip_lieap: bool,
    /// FNS / SNAP / Food Stamps
    pub food_and_nutrition_fns_snap: bool,
    pub medicaid: bool,
    pub work_first: bool,
}

/// The City of Raleigh Utility Assistance Application. Missing fields take
/// their empty defaults, so a partially collected form is complete in shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct UtilityForm {
    /// County Case Number
    pub county_case_number: String,
    /// Social Security Number
    pub social_security_number: String,
    /// Applicant Date of Birth
    pub date_of_birth: String,
    pub first_name: String,
    pub middle_initial: String,
    pub last_name: String,
    /// Jr, Sr, etc.
    pub suffix: String,
    pub residence_address_street: String,
    pub residence_address_city: String,
    pub residence_address_zip: String,
    pub mailing_address_street: String,
    pub mailing_address_city: String,
    pub mailing_address_zip: String,
    pub phone_number: String,
    pub email_address: String,
    /// List of household members including the applicant
    pub household_members: Vec<HouseholdMember>,
    /// Indicate all additional income sources for each household member
    pub additional_income_sources: Vec<IncomeSource>,
    /// Any additional family members or income not included on page 1
    pub additional_family_members: Vec<HouseholdMember>,
    pub are_you_currently_receiving: AssistancePrograms,
    pub have_you_received_raleigh_water_assistance: bool,
    /// If yes, when?
    pub most_recent_raleigh_water_assistance_date: String,
    #[schemars(extend("enum" = ["Yes", "No", "Other"]))]
    pub are_you_renting_your_home_apartment: String,
    pub amount_due: String,
    pub service_current_on: bool,
    pub city_of_raleigh_utility_account_number: String,
    pub name_on_account: String,
    /// Yes/No. If not checked, user is considered not interested.
    pub would_you_like_to_register_to_vote: bool,
    pub signature_applicant: String,
    pub signature_date: String,
}

/// Overlays model-supplied values onto `template`, which holds the form's
/// empty defaults. `null` keeps the default and scalars are coerced to the
/// default's type, so loosely typed arguments still make a valid form. Keys the
/// form does not know are kept as given.
fn merge_over(template: &Value, incoming: Value) -> Value {
    match (template, incoming) {
        (_, Value::Null) => template.clone(),
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                let slot = base.get(&key).unwrap_or(&Value::Null);
                let value = merge_over(slot, value);
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (Value::String(_), Value::Number(n)) => Value::String(n.to_string()),
        (Value::String(_), Value::Bool(b)) => Value::String(b.to_string()),
        (Value::Bool(_), Value::String(s)) => Value::Bool(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "yes" | "y" | "true"
        )),
        (Value::Array(_), Value::Array(items)) => {
            Value::Array(items.into_iter().map(loosen).collect())
        }
        (_, other) => other,
    }
}

/// List entries have no template: drop nulls and stringify numbers.
fn loosen(value: Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, loosen(v)))
                .collect(),
        ),
        Value::Number(n) => Value::String(n.to_string()),
        other => other,
    }
}

fn blank_form() -> serde_json::Result<Value> {
    serde_json::to_value(UtilityForm::default())
}

/// Parses a `YYYY-MM-DD` date, yielding `None` when missing or malformed.
pub fn try_parse_date(value: &str) -> Option<NaiveDate> {
    if value.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// A form as stored: empty strings become `NULL`, dates are typed, lists and
/// nested objects are kept as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilityFormRecord {
    pub county_case_number: Option<String>,
    pub social_security_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub first_name: Option<String>,
    pub middle_initial: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    pub residence_address_street: Option<String>,
    pub residence_address_city: Option<String>,
    pub residence_address_zip: Option<String>,
    pub mailing_address_street: Option<String>,
    pub mailing_address_city: Option<String>,
    pub mailing_address_zip: Option<String>,
    pub phone_number: Option<String>,
    pub email_address: Option<String>,
    pub household_members: Value,
    pub additional_income_sources: Value,
    pub additional_family_members: Value,
    pub are_you_currently_receiving: Value,
    pub have_you_received_raleigh_water_assistance: bool,
    pub most_recent_raleigh_water_assistance_date: Option<NaiveDate>,
    pub are_you_renting_your_home_apartment: Option<String>,
    pub amount_due: Option<String>,
    pub service_current_on: bool,
    pub city_of_raleigh_utility_account_number: Option<String>,
    pub name_on_account: Option<String>,
    pub would_you_like_to_register_to_vote: bool,
    pub signature_applicant: Option<String>,
    pub signature_date: Option<NaiveDate>,
}

impl From<&UtilityForm> for UtilityFormRecord {
    fn from(form: &UtilityForm) -> Self {
        Self {
            county_case_number: non_empty(&form.county_case_number),
            social_security_number: non_empty(&form.social_security_number),
            date_of_birth: try_parse_date(&form.date_of_birth),
            first_name: non_empty(&form.first_name),
            middle_initial: non_empty(&form.middle_initial),
            last_name: non_empty(&form.last_name),
            suffix: non_empty(&form.suffix),
            residence_address_street: non_empty(&form.residence_address_street),
            residence_address_city: non_empty(&form.residence_address_city),
            residence_address_zip: non_empty(&form.residence_address_zip),
            mailing_address_street: non_empty(&form.mailing_address_street),
            mailing_address_city: non_empty(&form.mailing_address_city),
            mailing_address_zip: non_empty(&form.mailing_address_zip),
            phone_number: non_empty(&form.phone_number),
            email_address: non_empty(&form.email_address),
            household_members: json!(form.household_members),
            additional_income_sources: json!(form.additional_income_sources),
            additional_family_members: json!(form.additional_family_members),
            are_you_currently_receiving: json!(form.are_you_currently_receiving),
            have_you_received_raleigh_water_assistance: form
                .have_you_received_raleigh_water_assistance,
            most_recent_raleigh_water_assistance_date: try_parse_date(
                &form.most_recent_raleigh_water_assistance_date,
            ),
            are_you_renting_your_home_apartment: non_empty(
                &form.are_you_renting_your_home_apartment,
            ),
            amount_due: non_empty(&form.amount_due),
            service_current_on: form.service_current_on,
            city_of_raleigh_utility_account_number: non_empty(
                &form.city_of_raleigh_utility_account_number,
            ),
            name_on_account: non_empty(&form.name_on_account),
            would_you_like_to_register_to_vote: form.would_you_like_to_register_to_vote,
            signature_applicant: non_empty(&form.signature_applicant),
            signature_date: try_parse_date(&form.signature_date),
        }
    }
}

/// Persistence for completed forms.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FormStore: Send + Sync {
    /// Inserts the form and returns the new row id.
    async fn insert_utility_form(&self, record: &UtilityFormRecord) -> Result<i64>;
}

pub struct FillOutFormTool;

impl FillOutFormTool {
    pub fn schema() -> ToolSchema {
        ToolSchema::for_args::<UtilityForm>(
            "Fill out the City of Raleigh Utility Assistance Application with all relevant fields \
             from both pages.",
        )
    }
}

#[async_trait]
impl ToolHandler for FillOutFormTool {
    async fn call(&self, args: ToolArgs) -> Result<ToolResult> {
        let form = merge_over(&blank_form()?, Value::Object(args));
        info!("Utility form updated");
        Ok(ToolResult::json_to_server(&form))
    }
}

pub struct SaveFormTool {
    store: Option<Arc<dyn FormStore>>,
}

impl SaveFormTool {
    pub fn schema() -> ToolSchema {
        ToolSchema::new(
            "Save the completed Utility Assistance Application form into the database.",
            json!({
                "type": "object",
                "properties": {
                    "form_data": {
                        "type": "object",
                        "description": "A dictionary of all fields from the completed form.",
                        "additionalProperties": true
                    }
                },
                "required": ["form_data"],
                "additionalProperties": false
            }),
        )
    }

    fn status(status: &str, message: &str) -> ToolResult {
        ToolResult::json_to_server(&json!({ "status": status, "message": message }))
    }

    /// `form_data` arrives either as an object or as a JSON-encoded string.
    fn parse_form(args: &ToolArgs) -> Option<UtilityForm> {
        let data = match args.get("form_data") {
            Some(Value::String(encoded)) => serde_json::from_str(encoded).ok()?,
            Some(value @ Value::Object(_)) => value.clone(),
            None => return Some(UtilityForm::default()),
            Some(_) => return None,
        };
        let merged = merge_over(&blank_form().ok()?, data);
        serde_json::from_value(merged).ok()
    }
}

#[async_trait]
impl ToolHandler for SaveFormTool {
    async fn call(&self, args: ToolArgs) -> Result<ToolResult> {
        let Some(store) = &self.store else {
            warn!("save_utility_form called without a configured form store");
            return Ok(Self::status("error", "Form storage is not configured."));
        };
        let Some(form) = Self::parse_form(&args) else {
            return Ok(Self::status("error", "Invalid JSON in form_data"));
        };

        match store.insert_utility_form(&UtilityFormRecord::from(&form)).await {
            Ok(id) => {
                info!(form_id = id, "Utility form saved");
                Ok(ToolResult::json_to_server(&json!({
                    "status": "success",
                    "message": "Utility form data inserted successfully.",
                    "inserted_id": id,
                })))
            }
            Err(e) => {
                error!(error = ?e, "Failed to insert utility form");
                Ok(Self::status("error", "Error inserting data."))
            }
        }
    }
}

/// Registers `fill_out_utility_form` and `save_utility_form`.
pub fn attach_form_tools(
    registry: &mut ToolRegistry,
    store: Option<Arc<dyn FormStore>>,
) -> Result<(), ToolError> {
    registry.register(
        "fill_out_utility_form",
        FillOutFormTool::schema(),
        Arc::new(FillOutFormTool),
    )?;
    registry.register(
        "save_utility_form",
        SaveFormTool::schema(),
        Arc::new(SaveFormTool { store }),
    )
}
