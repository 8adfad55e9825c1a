//! `drip compile-filter`.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use drip_filter::{
    AudienceContext, FilterGroups, PropertyKind, SqlBind, UnknownPropertyPolicy, compile,
};
use jiff::Timestamp;
use serde::Serialize;

use super::read_json;
use crate::TRACING_TARGET_COMMAND;

/// Arguments of `drip compile-filter`.
#[derive(Debug, Clone, Args)]
pub struct CompileFilterArgs {
    /// Filter groups JSON file (`-` for stdin).
    pub filter: PathBuf,

    /// Property registry JSON file: `{"<key>": "text" | "float" | "boolean" | "date"}`.
    #[arg(long)]
    pub properties: Option<PathBuf>,

    /// How conditions on unregistered properties compile.
    #[arg(long, default_value = "never")]
    pub unknown_properties: UnknownPropertyPolicy,

    /// Evaluation instant for time windows (RFC 3339); defaults to now.
    #[arg(long)]
    pub now: Option<Timestamp>,
}

/// A compiled filter as a `WHERE` fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledFilter {
    pub sql: String,
    pub binds: Vec<SqlBind>,
    pub clauses: usize,
}

pub fn run(args: &CompileFilterArgs) -> anyhow::Result<CompiledFilter> {
    let groups: FilterGroups = read_json(&args.filter)?;
    let properties: HashMap<String, PropertyKind> = match &args.properties {
        Some(path) => read_json(path)?,
        None => HashMap::new(),
    };

    let audience = AudienceContext::new(args.now.unwrap_or_else(Timestamp::now))
        .with_properties(properties)
        .with_unknown_property_policy(args.unknown_properties);

    compile_groups(&groups, &audience)
}

fn compile_groups(
    groups: &FilterGroups,
    audience: &AudienceContext,
) -> anyhow::Result<CompiledFilter> {
    groups.validate().context("filter is malformed")?;
    let predicate = compile(groups, audience).context("filter does not compile")?;
    let fragment = predicate.to_sql();

    tracing::debug!(
        target: TRACING_TARGET_COMMAND,
        clauses = predicate.clause_count(),
        binds = fragment.binds.len(),
        "Compiled filter"
    );

    Ok(CompiledFilter {
        sql: fragment.sql,
        binds: fragment.binds,
        clauses: predicate.clause_count(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn groups(value: serde_json::Value) -> FilterGroups {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_compiles_with_registry() {
        let groups = groups(json!({
            "operator": "AND",
            "groups": [{
                "operator": "AND",
                "conditions": [
                    { "field": "email", "operator": "endsWith", "value": "@acme.io" },
                    { "field": "properties.score", "operator": "gte", "value": 10 }
                ]
            }]
        }));
        let audience = AudienceContext::new(Timestamp::now())
            .with_property("score", PropertyKind::Float);

        let compiled = compile_groups(&groups, &audience).unwrap();
        assert_eq!(compiled.clauses, 2);
        assert_eq!(compiled.binds.len(), 3);
        assert_eq!(compiled.binds[1], SqlBind::Text("score".to_owned()));
        assert_eq!(compiled.binds[2], SqlBind::Float(10.0));
        assert!(compiled.sql.contains("$3"));
    }

    #[test]
    fn test_malformed_filter_fails() {
        let groups = groups(json!({
            "operator": "AND",
            "groups": [{
                "operator": "AND",
                "conditions": [{ "field": "lastOpenedAt", "operator": "eq", "value": "x" }]
            }]
        }));

        let error = compile_groups(&groups, &AudienceContext::new(Timestamp::now())).unwrap_err();
        assert!(error.to_string().contains("malformed"));
    }

    #[test]
    fn test_unsupported_operator_fails() {
        let groups = groups(json!({
            "operator": "AND",
            "groups": [{
                "operator": "AND",
                "conditions": [{ "field": "properties.vip", "operator": "gt", "value": true }]
            }]
        }));
        let audience = AudienceContext::new(Timestamp::now())
            .with_property("vip", PropertyKind::Boolean);

        let error = compile_groups(&groups, &audience).unwrap_err();
        assert!(error.to_string().contains("does not compile"));
    }
}
