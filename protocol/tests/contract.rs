use protocol::{
    AuditAction, OAuthProviderKind, Plan, PlanStatus, Role, SignupRequest, UpdatePlanRequest,
};

#[test]
fn plan_and_role_use_uppercase_wire_names() {
    assert_eq!(serde_json::to_string(&Plan::Pro).unwrap(), "\"PRO\"");
    assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
    let plan: Plan = serde_json::from_str("\"BASIC\"").unwrap();
    assert_eq!(plan, Plan::Basic);
}

#[test]
fn provider_uses_lowercase_wire_names() {
    assert_eq!(
        serde_json::to_string(&OAuthProviderKind::GitHub).unwrap(),
        "\"github\""
    );
}

#[test]
fn signup_name_is_optional() {
    let request: SignupRequest =
        serde_json::from_str(r#"{"email":"a@b.co","password":"hunter22"}"#).unwrap();
    assert_eq!(request.email, "a@b.co");
    assert!(request.name.is_none());
}

#[test]
fn plan_status_serializes_trial_fields() {
    let status = PlanStatus {
        plan: Plan::Pro,
        on_trial: true,
        trial_ends_at: None,
        trial_days_remaining: 3,
        plan_override: false,
    };
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["plan"], "PRO");
    assert_eq!(value["on_trial"], true);
    assert_eq!(value["trial_days_remaining"], 3);
}

#[test]
fn update_plan_reads_override_flag() {
    let request: UpdatePlanRequest =
        serde_json::from_str(r#"{"plan":"PRO","override":false}"#).unwrap();
    assert_eq!(request.plan, Plan::Pro);
    assert!(!request.plan_override);

    let legacy: UpdatePlanRequest =
        serde_json::from_str(r#"{"plan":"BASIC","plan_override":false}"#).unwrap();
    assert!(!legacy.plan_override);

    let defaulted: UpdatePlanRequest = serde_json::from_str(r#"{"plan":"PRO"}"#).unwrap();
    assert!(defaulted.plan_override);

    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["override"], false);
}

#[test]
fn audit_action_rejects_unknown_names() {
    let parsed: Result<AuditAction, _> = serde_json::from_str("\"SOMETHING_ELSE\"");
    assert!(parsed.is_err());
}
