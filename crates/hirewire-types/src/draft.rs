use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of job draft field ids. The wire names are the camelCase ids
/// the wizard UI submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldId {
    RoleTitle,
    CompanyName,
    LogoUrl,
    Location,
    ZipCode,
    Industry,
    SeniorityLevel,
    EmploymentType,
    WorkModel,
    JobDescription,
    Salary,
    SalaryPeriod,
    Currency,
    CoreDuties,
    MustHaves,
    Benefits,
}

/// Fields that must be non-empty before the refine task may run.
pub const DRAFT_REQUIRED_FIELDS: [FieldId; 6] = [
    FieldId::RoleTitle,
    FieldId::CompanyName,
    FieldId::Location,
    FieldId::SeniorityLevel,
    FieldId::EmploymentType,
    FieldId::JobDescription,
];

impl FieldId {
    pub const ALL: [FieldId; 16] = [
        FieldId::RoleTitle,
        FieldId::CompanyName,
        FieldId::LogoUrl,
        FieldId::Location,
        FieldId::ZipCode,
        FieldId::Industry,
        FieldId::SeniorityLevel,
        FieldId::EmploymentType,
        FieldId::WorkModel,
        FieldId::JobDescription,
        FieldId::Salary,
        FieldId::SalaryPeriod,
        FieldId::Currency,
        FieldId::CoreDuties,
        FieldId::MustHaves,
        FieldId::Benefits,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldId::RoleTitle => "roleTitle",
            FieldId::CompanyName => "companyName",
            FieldId::LogoUrl => "logoUrl",
            FieldId::Location => "location",
            FieldId::ZipCode => "zipCode",
            FieldId::Industry => "industry",
            FieldId::SeniorityLevel => "seniorityLevel",
            FieldId::EmploymentType => "employmentType",
            FieldId::WorkModel => "workModel",
            FieldId::JobDescription => "jobDescription",
            FieldId::Salary => "salary",
            FieldId::SalaryPeriod => "salaryPeriod",
            FieldId::Currency => "currency",
            FieldId::CoreDuties => "coreDuties",
            FieldId::MustHaves => "mustHaves",
            FieldId::Benefits => "benefits",
        }
    }

    pub fn parse(input: &str) -> Option<FieldId> {
        FieldId::ALL.iter().copied().find(|f| f.as_str() == input)
    }

    pub fn is_list(self) -> bool {
        matches!(
            self,
            FieldId::CoreDuties | FieldId::MustHaves | FieldId::Benefits
        )
    }
}

/// The canonical in-progress job record. Scalars are trimmed with empty
/// equivalent to absent; list fields keep entry order and hold only
/// non-empty trimmed strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JobDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seniority_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employment_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub core_duties: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must_haves: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub benefits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftFieldError {
    UnknownField(String),
    InvalidLogoUrl(String),
    InvalidValue { field: FieldId, detail: String },
}

impl std::fmt::Display for DraftFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftFieldError::UnknownField(name) => write!(f, "unknown draft field `{name}`"),
            DraftFieldError::InvalidLogoUrl(value) => {
                write!(f, "logoUrl must be an absolute or data: URL, got `{value}`")
            }
            DraftFieldError::InvalidValue { field, detail } => {
                write!(f, "invalid value for `{}`: {detail}", field.as_str())
            }
        }
    }
}

impl std::error::Error for DraftFieldError {}

fn normalize_scalar(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

pub fn is_valid_logo_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://") || value.starts_with("data:")
}

impl JobDraft {
    /// Trim scalars, drop empty list entries, and reject malformed logo URLs.
    pub fn normalized(mut self) -> Result<JobDraft, DraftFieldError> {
        self.role_title = normalize_scalar(self.role_title);
        self.company_name = normalize_scalar(self.company_name);
        self.logo_url = normalize_scalar(self.logo_url);
        self.location = normalize_scalar(self.location);
        self.zip_code = normalize_scalar(self.zip_code);
        self.industry = normalize_scalar(self.industry);
        self.seniority_level = normalize_scalar(self.seniority_level);
        self.employment_type = normalize_scalar(self.employment_type);
        self.work_model = normalize_scalar(self.work_model);
        self.job_description = normalize_scalar(self.job_description);
        self.salary = normalize_scalar(self.salary);
        self.salary_period = normalize_scalar(self.salary_period);
        self.currency = normalize_scalar(self.currency);
        self.core_duties = normalize_list(self.core_duties);
        self.must_haves = normalize_list(self.must_haves);
        self.benefits = normalize_list(self.benefits);

        if let Some(url) = &self.logo_url {
            if !is_valid_logo_url(url) {
                return Err(DraftFieldError::InvalidLogoUrl(url.clone()));
            }
        }
        Ok(self)
    }

    /// Scalar merge; list fields replace whole when the patch carries them.
    pub fn merged_with(mut self, patch: JobDraft) -> JobDraft {
        macro_rules! take_scalar {
            ($field:ident) => {
                if patch.$field.is_some() {
                    self.$field = patch.$field;
                }
            };
        }
        take_scalar!(role_title);
        take_scalar!(company_name);
        take_scalar!(logo_url);
        take_scalar!(location);
        take_scalar!(zip_code);
        take_scalar!(industry);
        take_scalar!(seniority_level);
        take_scalar!(employment_type);
        take_scalar!(work_model);
        take_scalar!(job_description);
        take_scalar!(salary);
        take_scalar!(salary_period);
        take_scalar!(currency);
        if !patch.core_duties.is_empty() {
            self.core_duties = patch.core_duties;
        }
        if !patch.must_haves.is_empty() {
            self.must_haves = patch.must_haves;
        }
        if !patch.benefits.is_empty() {
            self.benefits = patch.benefits;
        }
        self
    }

    pub fn get(&self, field: FieldId) -> Option<Value> {
        let scalar = |v: &Option<String>| v.clone().map(Value::String);
        let list = |v: &Vec<String>| {
            if v.is_empty() {
                None
            } else {
                Some(Value::Array(v.iter().cloned().map(Value::String).collect()))
            }
        };
        match field {
            FieldId::RoleTitle => scalar(&self.role_title),
            FieldId::CompanyName => scalar(&self.company_name),
            FieldId::LogoUrl => scalar(&self.logo_url),
            FieldId::Location => scalar(&self.location),
            FieldId::ZipCode => scalar(&self.zip_code),
            FieldId::Industry => scalar(&self.industry),
            FieldId::SeniorityLevel => scalar(&self.seniority_level),
            FieldId::EmploymentType => scalar(&self.employment_type),
            FieldId::WorkModel => scalar(&self.work_model),
            FieldId::JobDescription => scalar(&self.job_description),
            FieldId::Salary => scalar(&self.salary),
            FieldId::SalaryPeriod => scalar(&self.salary_period),
            FieldId::Currency => scalar(&self.currency),
            FieldId::CoreDuties => list(&self.core_duties),
            FieldId::MustHaves => list(&self.must_haves),
            FieldId::Benefits => list(&self.benefits),
        }
    }

    /// Apply a single field update. `Null` clears the field; list fields
    /// accept arrays of strings, scalars accept strings.
    pub fn set_field(&mut self, field: FieldId, value: Value) -> Result<(), DraftFieldError> {
        if value.is_null() {
            self.clear_field(field);
            return Ok(());
        }
        if field.is_list() {
            let Value::Array(items) = value else {
                return Err(DraftFieldError::InvalidValue {
                    field,
                    detail: "expected an array of strings".to_string(),
                });
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => {
                        let trimmed = s.trim().to_string();
                        if !trimmed.is_empty() {
                            out.push(trimmed);
                        }
                    }
                    other => {
                        return Err(DraftFieldError::InvalidValue {
                            field,
                            detail: format!("non-string list entry: {other}"),
                        })
                    }
                }
            }
            match field {
                FieldId::CoreDuties => self.core_duties = out,
                FieldId::MustHaves => self.must_haves = out,
                FieldId::Benefits => self.benefits = out,
                _ => unreachable!(),
            }
            return Ok(());
        }

        let Value::String(raw) = value else {
            return Err(DraftFieldError::InvalidValue {
                field,
                detail: "expected a string".to_string(),
            });
        };
        let trimmed = raw.trim().to_string();
        let next = if trimmed.is_empty() { None } else { Some(trimmed) };
        if field == FieldId::LogoUrl {
            if let Some(url) = &next {
                if !is_valid_logo_url(url) {
                    return Err(DraftFieldError::InvalidLogoUrl(url.clone()));
                }
            }
        }
        match field {
            FieldId::RoleTitle => self.role_title = next,
            FieldId::CompanyName => self.company_name = next,
            FieldId::LogoUrl => self.logo_url = next,
            FieldId::Location => self.location = next,
            FieldId::ZipCode => self.zip_code = next,
            FieldId::Industry => self.industry = next,
            FieldId::SeniorityLevel => self.seniority_level = next,
            FieldId::EmploymentType => self.employment_type = next,
            FieldId::WorkModel => self.work_model = next,
            FieldId::JobDescription => self.job_description = next,
            FieldId::Salary => self.salary = next,
            FieldId::SalaryPeriod => self.salary_period = next,
            FieldId::Currency => self.currency = next,
            _ => unreachable!(),
        }
        Ok(())
    }

    pub fn clear_field(&mut self, field: FieldId) {
        match field {
            FieldId::RoleTitle => self.role_title = None,
            FieldId::CompanyName => self.company_name = None,
            FieldId::LogoUrl => self.logo_url = None,
            FieldId::Location => self.location = None,
            FieldId::ZipCode => self.zip_code = None,
            FieldId::Industry => self.industry = None,
            FieldId::SeniorityLevel => self.seniority_level = None,
            FieldId::EmploymentType => self.employment_type = None,
            FieldId::WorkModel => self.work_model = None,
            FieldId::JobDescription => self.job_description = None,
            FieldId::Salary => self.salary = None,
            FieldId::SalaryPeriod => self.salary_period = None,
            FieldId::Currency => self.currency = None,
            FieldId::CoreDuties => self.core_duties.clear(),
            FieldId::MustHaves => self.must_haves.clear(),
            FieldId::Benefits => self.benefits.clear(),
        }
    }

    pub fn missing_required_fields(&self) -> Vec<FieldId> {
        DRAFT_REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| self.get(*field).is_none())
            .collect()
    }

    pub fn is_refine_ready(&self) -> bool {
        self.missing_required_fields().is_empty()
    }

    pub fn empty_fields(&self) -> Vec<FieldId> {
        FieldId::ALL
            .iter()
            .copied()
            .filter(|field| self.get(*field).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalized_trims_scalars_and_drops_empty_list_entries() {
        let draft = JobDraft {
            role_title: Some("  Senior Backend Engineer  ".to_string()),
            company_name: Some("   ".to_string()),
            core_duties: vec!["  ship  ".to_string(), "".to_string()],
            ..JobDraft::default()
        };
        let normalized = draft.normalized().expect("normalized");
        assert_eq!(normalized.role_title.as_deref(), Some("Senior Backend Engineer"));
        assert_eq!(normalized.company_name, None);
        assert_eq!(normalized.core_duties, vec!["ship".to_string()]);
    }

    #[test]
    fn normalized_rejects_relative_logo_url() {
        let draft = JobDraft {
            logo_url: Some("assets/logo.png".to_string()),
            ..JobDraft::default()
        };
        assert!(matches!(
            draft.normalized(),
            Err(DraftFieldError::InvalidLogoUrl(_))
        ));
    }

    #[test]
    fn normalized_accepts_data_url_logo() {
        let draft = JobDraft {
            logo_url: Some("data:image/png;base64,AAAA".to_string()),
            ..JobDraft::default()
        };
        assert!(draft.normalized().is_ok());
    }

    #[test]
    fn merged_with_keeps_unpatched_scalars_and_replaces_lists_whole() {
        let base = JobDraft {
            role_title: Some("Engineer".to_string()),
            location: Some("Berlin".to_string()),
            benefits: vec!["coffee".to_string(), "gym".to_string()],
            ..JobDraft::default()
        };
        let patch = JobDraft {
            location: Some("Tel Aviv".to_string()),
            benefits: vec!["equity".to_string()],
            ..JobDraft::default()
        };
        let merged = base.merged_with(patch);
        assert_eq!(merged.role_title.as_deref(), Some("Engineer"));
        assert_eq!(merged.location.as_deref(), Some("Tel Aviv"));
        assert_eq!(merged.benefits, vec!["equity".to_string()]);
    }

    #[test]
    fn set_field_null_clears() {
        let mut draft = JobDraft {
            salary: Some("90k".to_string()),
            ..JobDraft::default()
        };
        draft.set_field(FieldId::Salary, Value::Null).expect("clear");
        assert_eq!(draft.salary, None);
    }

    #[test]
    fn set_field_rejects_non_string_list_entries() {
        let mut draft = JobDraft::default();
        let err = draft
            .set_field(FieldId::MustHaves, json!(["rust", 7]))
            .unwrap_err();
        assert!(matches!(err, DraftFieldError::InvalidValue { .. }));
    }

    #[test]
    fn missing_required_fields_tracks_the_refine_gate() {
        let mut draft = JobDraft {
            role_title: Some("Engineer".to_string()),
            company_name: Some("Botson Labs".to_string()),
            location: Some("Tel Aviv".to_string()),
            seniority_level: Some("mid".to_string()),
            employment_type: Some("full_time".to_string()),
            ..JobDraft::default()
        };
        assert_eq!(draft.missing_required_fields(), vec![FieldId::JobDescription]);
        draft.job_description = Some("Lead the team.".to_string());
        assert!(draft.is_refine_ready());
    }

    #[test]
    fn field_id_wire_names_round_trip() {
        for field in FieldId::ALL {
            assert_eq!(FieldId::parse(field.as_str()), Some(field));
        }
        let serialized = serde_json::to_string(&FieldId::SeniorityLevel).expect("serialize");
        assert_eq!(serialized, "\"seniorityLevel\"");
    }
}
