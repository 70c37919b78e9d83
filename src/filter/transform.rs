//! Response rewriting rules, one per [`ShapeKind`]
//!
//! Each rule takes the parsed body by value, removes the environments whose
//! name does not match the filter, and hands the body back. Fields the rule
//! does not know about are left exactly as they were.
//!
//! The project overview is the delicate one: environments are referenced from
//! three other places (channel lists, per-release deployment maps and the
//! "next deployment" lists). All of them are pruned against one set of kept
//! ids taken from the already filtered `Environments` list, so the result
//! never points at an environment it no longer contains.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{FilterError, FilterPatterns, ShapeKind};

/// What a rule did with a response
#[derive(Debug)]
pub enum FilterOutcome {
    /// The rule does not apply to this body; send the original bytes
    Unchanged,

    /// The body was rewritten
    Filtered {
        /// The rewritten body
        body: Value,
        /// Environment counts for logging
        stats: FilterStats,
    },
}

/// Environment counts before/after a rewrite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub dropped: usize,
}

impl FilterStats {
    fn new(total: usize, kept: usize) -> Self {
        Self {
            kept,
            dropped: total - kept,
        }
    }
}

/// Dispatch a parsed body to the rule for its shape
pub fn transform(
    shape: ShapeKind,
    body: Value,
    patterns: &FilterPatterns,
) -> Result<FilterOutcome, FilterError> {
    match shape {
        ShapeKind::ProjectOverview => filter_project_overview(body, patterns),
        ShapeKind::EnvironmentsList => filter_environments_list(body, patterns),
        ShapeKind::EnvironmentsSummary => filter_environments_summary(body, patterns),
    }
}

// ============================================================================
// Shape rules
// ============================================================================

/// `/api/progression/Projects-N`: environments plus everything that references them
pub fn filter_project_overview(
    mut body: Value,
    patterns: &FilterPatterns,
) -> Result<FilterOutcome, FilterError> {
    const SHAPE: ShapeKind = ShapeKind::ProjectOverview;

    let root = body
        .as_object_mut()
        .ok_or_else(|| FilterError::malformed(SHAPE, "expected a JSON object"))?;

    // No environment list means this is not the payload we know how to prune.
    let Some(environments) = present(root, "Environments") else {
        return Ok(FilterOutcome::Unchanged);
    };
    let environments = environments
        .as_array_mut()
        .ok_or_else(|| FilterError::malformed(SHAPE, "Environments is not an array"))?;

    let total = environments.len();
    retain_by(environments, |env| {
        Ok(patterns.matches(environment_name(env, SHAPE)?))
    })?;
    let stats = FilterStats::new(total, environments.len());

    let kept_ids = environments
        .iter()
        .map(|env| environment_id(env, SHAPE).map(str::to_owned))
        .collect::<Result<HashSet<_>, _>>()?;

    if let Some(channels) = present(root, "ChannelEnvironments") {
        let channels = channels
            .as_object_mut()
            .ok_or_else(|| FilterError::malformed(SHAPE, "ChannelEnvironments is not an object"))?;
        for (channel, list) in channels.iter_mut() {
            if list.is_null() {
                continue;
            }
            let list = list.as_array_mut().ok_or_else(|| {
                FilterError::malformed(
                    SHAPE,
                    format!("ChannelEnvironments[{channel}] is not an array"),
                )
            })?;
            retain_by(list, |env| {
                Ok(kept_ids.contains(environment_id(env, SHAPE)?))
            })?;
        }
    }

    if let Some(releases) = present(root, "Releases") {
        let releases = releases
            .as_array_mut()
            .ok_or_else(|| FilterError::malformed(SHAPE, "Releases is not an array"))?;
        for release in releases.iter_mut() {
            prune_release(release, &kept_ids)?;
        }
    }

    Ok(FilterOutcome::Filtered { body, stats })
}

/// Drop deployments and next-deployment targets that point at removed environments
fn prune_release(release: &mut Value, kept_ids: &HashSet<String>) -> Result<(), FilterError> {
    const SHAPE: ShapeKind = ShapeKind::ProjectOverview;

    let release = release
        .as_object_mut()
        .ok_or_else(|| FilterError::malformed(SHAPE, "release is not an object"))?;

    if let Some(deployments) = present(release, "Deployments") {
        deployments
            .as_object_mut()
            .ok_or_else(|| FilterError::malformed(SHAPE, "Deployments is not an object"))?
            .retain(|environment_id, _| kept_ids.contains(environment_id));
    }

    if let Some(next) = present(release, "NextDeployments") {
        let next = next
            .as_array_mut()
            .ok_or_else(|| FilterError::malformed(SHAPE, "NextDeployments is not an array"))?;
        retain_by(next, |id| {
            let id = id.as_str().ok_or_else(|| {
                FilterError::malformed(SHAPE, "NextDeployments entry is not a string")
            })?;
            Ok(kept_ids.contains(id))
        })?;
    }

    Ok(())
}

/// `/api/environments/all`: a bare array of environments
pub fn filter_environments_list(
    mut body: Value,
    patterns: &FilterPatterns,
) -> Result<FilterOutcome, FilterError> {
    const SHAPE: ShapeKind = ShapeKind::EnvironmentsList;

    let environments = body
        .as_array_mut()
        .ok_or_else(|| FilterError::malformed(SHAPE, "expected a JSON array"))?;

    let total = environments.len();
    retain_by(environments, |env| {
        Ok(patterns.matches(environment_name(env, SHAPE)?))
    })?;
    let stats = FilterStats::new(total, environments.len());

    Ok(FilterOutcome::Filtered { body, stats })
}

/// `/api/environments/summary`: summaries wrapping an environment each
pub fn filter_environments_summary(
    mut body: Value,
    patterns: &FilterPatterns,
) -> Result<FilterOutcome, FilterError> {
    const SHAPE: ShapeKind = ShapeKind::EnvironmentsSummary;

    let summaries = body
        .as_object_mut()
        .ok_or_else(|| FilterError::malformed(SHAPE, "expected a JSON object"))?
        .get_mut("EnvironmentSummaries")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| FilterError::malformed(SHAPE, "EnvironmentSummaries array missing"))?;

    let total = summaries.len();
    retain_by(summaries, |summary| {
        let env = summary
            .get("Environment")
            .ok_or_else(|| FilterError::malformed(SHAPE, "summary without Environment"))?;
        Ok(patterns.matches(environment_name(env, SHAPE)?))
    })?;
    let stats = FilterStats::new(total, summaries.len());

    Ok(FilterOutcome::Filtered { body, stats })
}

// ============================================================================
// Helpers
// ============================================================================

/// Field lookup that treats an explicit `null` the same as a missing key
fn present<'a>(object: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Value> {
    object.get_mut(key).filter(|v| !v.is_null())
}

fn environment_name(env: &Value, shape: ShapeKind) -> Result<&str, FilterError> {
    env.get("Name")
        .and_then(Value::as_str)
        .ok_or_else(|| FilterError::malformed(shape, "environment without a string Name"))
}

fn environment_id(env: &Value, shape: ShapeKind) -> Result<&str, FilterError> {
    env.get("Id")
        .and_then(Value::as_str)
        .ok_or_else(|| FilterError::malformed(shape, "environment without a string Id"))
}

/// `Vec::retain` with a fallible predicate.
///
/// Every element is checked before anything is removed, so an error leaves
/// the vector untouched.
fn retain_by<F>(items: &mut Vec<Value>, mut keep: F) -> Result<(), FilterError>
where
    F: FnMut(&Value) -> Result<bool, FilterError>,
{
    let decisions = items
        .iter()
        .map(&mut keep)
        .collect::<Result<Vec<bool>, _>>()?;
    let mut decisions = decisions.into_iter();
    items.retain(|_| decisions.next().unwrap_or(false));
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::compile;
    use serde_json::json;

    fn filtered(outcome: FilterOutcome) -> (Value, FilterStats) {
        match outcome {
            FilterOutcome::Filtered { body, stats } => (body, stats),
            other => panic!("Expected Filtered, got {:?}", other),
        }
    }

    fn overview_fixture() -> Value {
        json!({
            "Environments": [
                {"Id": "Environments-1", "Name": "Dev", "SortOrder": 0},
                {"Id": "Environments-2", "Name": "Staging-EU"},
                {"Id": "Environments-3", "Name": "Production-EU"},
                {"Id": "Environments-4", "Name": "Production-US"}
            ],
            "ChannelEnvironments": {
                "Channels-1": [
                    {"Id": "Environments-1", "Name": "Dev"},
                    {"Id": "Environments-3", "Name": "Production-EU"}
                ],
                "Channels-2": [
                    {"Id": "Environments-4", "Name": "Production-US"},
                    {"Id": "Environments-2", "Name": "Staging-EU"}
                ]
            },
            "Releases": [
                {
                    "Release": {"Version": "1.2.0"},
                    "Deployments": {
                        "Environments-1": [{"State": "Success"}],
                        "Environments-3": [{"State": "Failed"}]
                    },
                    "NextDeployments": ["Environments-2", "Environments-4"]
                },
                {
                    "Release": {"Version": "1.1.0"},
                    "Deployments": {"Environments-4": [{"State": "Success"}]},
                    "NextDeployments": []
                }
            ],
            "LifecycleEnvironments": {}
        })
    }

    /// Every environment reference in the body points at a listed environment
    fn assert_referentially_consistent(body: &Value) {
        let ids: HashSet<&str> = body["Environments"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["Id"].as_str().unwrap())
            .collect();

        for list in body["ChannelEnvironments"].as_object().unwrap().values() {
            for env in list.as_array().unwrap() {
                assert!(ids.contains(env["Id"].as_str().unwrap()), "dangling {env}");
            }
        }
        for release in body["Releases"].as_array().unwrap() {
            for key in release["Deployments"].as_object().unwrap().keys() {
                assert!(ids.contains(key.as_str()), "dangling deployment {key}");
            }
            for id in release["NextDeployments"].as_array().unwrap() {
                assert!(ids.contains(id.as_str().unwrap()), "dangling next {id}");
            }
        }
    }

    #[test]
    fn test_project_overview_scenario() {
        let body = json!({
            "Environments": [
                {"Id": "e1", "Name": "Production"},
                {"Id": "e2", "Name": "Staging"}
            ],
            "Releases": [{
                "Deployments": {"e1": {"State": "Success"}, "e2": {"State": "Queued"}},
                "NextDeployments": ["e1", "e2"]
            }]
        });

        let (body, stats) =
            filtered(filter_project_overview(body, &compile("Production").unwrap()).unwrap());

        assert_eq!(body["Environments"], json!([{"Id": "e1", "Name": "Production"}]));
        assert_eq!(
            body["Releases"][0]["Deployments"],
            json!({"e1": {"State": "Success"}})
        );
        assert_eq!(body["Releases"][0]["NextDeployments"], json!(["e1"]));
        assert_eq!(stats, FilterStats { kept: 1, dropped: 1 });
    }

    #[test]
    fn test_project_overview_is_referentially_consistent() {
        for expr in ["Production", "EU$", "Dev,Staging", "nothing-matches", ".*"] {
            let patterns = compile(expr).unwrap();
            let (body, _) =
                filtered(filter_project_overview(overview_fixture(), &patterns).unwrap());
            assert_referentially_consistent(&body);
        }
    }

    #[test]
    fn test_project_overview_preserves_order_and_unknown_fields() {
        let patterns = compile("Production").unwrap();
        let (body, _) = filtered(filter_project_overview(overview_fixture(), &patterns).unwrap());

        let names: Vec<&str> = body["Environments"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["Name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Production-EU", "Production-US"]);
        assert_eq!(
            body["ChannelEnvironments"]["Channels-2"],
            json!([{"Id": "Environments-4", "Name": "Production-US"}])
        );
        assert_eq!(body["Releases"][0]["Release"], json!({"Version": "1.2.0"}));
        assert_eq!(body["LifecycleEnvironments"], json!({}));
    }

    #[test]
    fn test_project_overview_is_idempotent() {
        let patterns = compile("Staging,US").unwrap();
        let (once, _) = filtered(filter_project_overview(overview_fixture(), &patterns).unwrap());
        let (twice, stats) = filtered(filter_project_overview(once.clone(), &patterns).unwrap());
        assert_eq!(once, twice);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_project_overview_without_environments_is_unchanged() {
        let body = json!({"Releases": [{"NextDeployments": ["e1"]}]});
        let outcome = filter_project_overview(body, &compile("Prod").unwrap()).unwrap();
        assert!(matches!(outcome, FilterOutcome::Unchanged));

        let body = json!({"Environments": null});
        let outcome = filter_project_overview(body, &compile("Prod").unwrap()).unwrap();
        assert!(matches!(outcome, FilterOutcome::Unchanged));
    }

    #[test]
    fn test_project_overview_optional_sections() {
        let body = json!({"Environments": [{"Id": "e1", "Name": "Prod"}], "Releases": [{}]});
        let (body, _) =
            filtered(filter_project_overview(body, &compile("Prod").unwrap()).unwrap());
        assert_eq!(body["Releases"], json!([{}]));
    }

    #[test]
    fn test_project_overview_malformed() {
        let patterns = compile("Prod").unwrap();
        let cases = [
            json!([]),
            json!({"Environments": {"Id": "e1"}}),
            json!({"Environments": [{"Id": "e1"}]}),
            json!({"Environments": [{"Name": "Prod"}]}),
            json!({"Environments": [], "ChannelEnvironments": []}),
            json!({"Environments": [], "Releases": [{"NextDeployments": [1]}]}),
            json!({"Environments": [], "Releases": [{"Deployments": []}]}),
        ];
        for body in cases {
            let err = filter_project_overview(body.clone(), &patterns).unwrap_err();
            assert!(
                matches!(err, FilterError::MalformedResponse { shape: ShapeKind::ProjectOverview, .. }),
                "{body} -> {err:?}"
            );
        }
    }

    #[test]
    fn test_environments_list() {
        let body = json!([
            {"Id": "Environments-1", "Name": "Production-EU"},
            {"Id": "Environments-2", "Name": "Dev"},
            {"Id": "Environments-3", "Name": "production-us"}
        ]);
        let (body, stats) =
            filtered(filter_environments_list(body, &compile("Production.*").unwrap()).unwrap());
        assert_eq!(
            body,
            json!([
                {"Id": "Environments-1", "Name": "Production-EU"},
                {"Id": "Environments-3", "Name": "production-us"}
            ])
        );
        assert_eq!(stats, FilterStats { kept: 2, dropped: 1 });
    }

    #[test]
    fn test_environments_list_malformed() {
        let patterns = compile("Prod").unwrap();
        assert!(filter_environments_list(json!({"Items": []}), &patterns).is_err());
        assert!(filter_environments_list(json!([{"Id": "e1"}]), &patterns).is_err());
    }

    #[test]
    fn test_environments_summary_scenario() {
        let body = json!({
            "EnvironmentSummaries": [
                {"Environment": {"Name": "Prod"}, "MachineHealthStatusSummaries": {}},
                {"Environment": {"Name": "Dev"}}
            ],
            "TotalMachines": 12
        });
        let (body, stats) =
            filtered(filter_environments_summary(body, &compile("Prod").unwrap()).unwrap());
        assert_eq!(
            body["EnvironmentSummaries"],
            json!([{"Environment": {"Name": "Prod"}, "MachineHealthStatusSummaries": {}}])
        );
        assert_eq!(body["TotalMachines"], json!(12));
        assert_eq!(stats, FilterStats { kept: 1, dropped: 1 });
    }

    #[test]
    fn test_environments_summary_malformed() {
        let patterns = compile("Prod").unwrap();
        assert!(filter_environments_summary(json!({}), &patterns).is_err());
        assert!(filter_environments_summary(json!([]), &patterns).is_err());
        assert!(filter_environments_summary(
            json!({"EnvironmentSummaries": [{"Machines": []}]}),
            &patterns
        )
        .is_err());
    }

    #[test]
    fn test_transform_dispatches_by_shape() {
        let patterns = compile("Prod").unwrap();
        let list = json!([{"Name": "Prod"}, {"Name": "Dev"}]);
        let (body, _) =
            filtered(transform(ShapeKind::EnvironmentsList, list.clone(), &patterns).unwrap());
        assert_eq!(body, json!([{"Name": "Prod"}]));

        // The same body is malformed for the other shapes
        assert!(transform(ShapeKind::EnvironmentsSummary, list.clone(), &patterns).is_err());
        assert!(transform(ShapeKind::ProjectOverview, list, &patterns).is_err());
    }
}
