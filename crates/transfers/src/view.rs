use common::config::Sources;
use common::types::ServiceKind;
use common::warehouse::Param;

use crate::allowlist::Allowlist;
use crate::dialect::Dialect;
use crate::BuildError;

/// Normalized event columns, in projection order. Both union branches
/// emit exactly these, with the same casts.
pub const VIEW_COLUMNS: [&str; 10] = [
    "created_at",
    "event_id",
    "service_kind",
    "source_chain",
    "destination_chain",
    "user_address",
    "amount_native",
    "amount_usd",
    "fee_usd",
    "asset",
];

/// SQL producing the normalized event shape, with the values its `?`
/// placeholders bind, in order. Meant to sit in a `WITH events AS (...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFragment {
    pub dialect: Dialect,
    pub sql: String,
    pub params: Vec<Param>,
}

/// How one raw source maps onto the normalized columns. Every expression
/// is rendered against the row alias `r`.
struct Branch {
    kind: ServiceKind,
    table: String,
    user_address: String,
    source_chain: String,
    destination_chain: String,
    amount: String,
    price: String,
    fee_usd: String,
    asset: String,
    /// Raw fields the allow-list is matched against (any one suffices).
    allowlist_fields: Vec<String>,
}

fn transfer_branch(d: Dialect, table: &str) -> Branch {
    let price = d.json_number("r.data", "link.price");
    Branch {
        kind: ServiceKind::TokenTransfer,
        table: table.to_string(),
        user_address: "r.recipient_address".to_string(),
        source_chain: d.json_text("r.data", "send.original_source_chain"),
        destination_chain: d.json_text("r.data", "send.original_destination_chain"),
        amount: d.json_number("r.data", "send.amount"),
        fee_usd: format!("({}) * ({price})", d.json_number("r.data", "send.fee_value")),
        price,
        asset: d.json_text("r.data", "send.denom"),
        allowlist_fields: vec!["r.sender_address".to_string()],
    }
}

fn gmp_branch(d: Dialect, table: &str) -> Branch {
    let gas_usd = format!(
        "({}) * ({})",
        d.json_number("r.data", "gas.gas_used_amount"),
        d.json_number("r.data", "gas_price_rate.source.token_price.usd"),
    );
    Branch {
        kind: ServiceKind::MessagePassing,
        table: table.to_string(),
        user_address: d.json_text("r.data", "call.transaction.from"),
        source_chain: d.json_text("r.data", "call.chain"),
        destination_chain: d.json_text("r.data", "call.returnValues.destinationChain"),
        amount: d.json_number("r.data", "amount"),
        price: d.json_number("r.data", "token_price.usd"),
        fee_usd: format!(
            "COALESCE({gas_usd}, {})",
            d.json_number("r.data", "fees.express_fee_usd")
        ),
        asset: d.json_text("r.data", "symbol"),
        allowlist_fields: vec![
            d.json_text("r.data", "call.returnValues.destinationContractAddress"),
            d.json_text("r.data", "approved.returnValues.contractAddress"),
        ],
    }
}

impl Branch {
    fn render(&self, d: Dialect, allowlist: &Allowlist, params: &mut Vec<Param>) -> String {
        let amount_usd = format!("({}) * ({})", self.amount, self.price);
        let projections = [
            d.timestamp("r.created_at"),
            d.text("r.id"),
            d.text(&format!("'{}'", self.kind.as_str())),
            d.chain_name(&self.source_chain),
            d.chain_name(&self.destination_chain),
            d.text(&self.user_address),
            d.real(&self.amount),
            d.real(&amount_usd),
            d.real(&self.fee_usd),
            d.text(&self.asset),
        ];
        let select = projections
            .iter()
            .zip(VIEW_COLUMNS)
            .map(|(expr, name)| format!("    {expr} AS {name}"))
            .collect::<Vec<_>>()
            .join(",\n");

        let mut matches = Vec::new();
        for entry in allowlist.iter() {
            for field in &self.allowlist_fields {
                matches.push(d.contains_param(field));
                params.push(Param::Text(entry.to_string()));
            }
        }

        format!(
            "SELECT\n{select}\nFROM {table} r\nWHERE r.status = 'executed'\n  AND r.simplified_status = 'received'\n  AND ({matches})",
            table = self.table,
            matches = matches.join("\n    OR "),
        )
    }
}

/// Union of the token-transfer and GMP sources as normalized events.
///
/// Both branches keep only executed, received rows whose allow-list field
/// contains one of the entries. Table names come from configuration and
/// are checked to be plain (optionally dotted) identifiers, since they
/// cannot be bound.
pub fn build_normalized_view(
    dialect: Dialect,
    sources: &Sources,
    allowlist: &Allowlist,
) -> Result<QueryFragment, BuildError> {
    validate_identifier(&sources.transfers_table)?;
    validate_identifier(&sources.gmp_table)?;

    let mut params = Vec::new();
    let transfers =
        transfer_branch(dialect, &sources.transfers_table).render(dialect, allowlist, &mut params);
    let gmp = gmp_branch(dialect, &sources.gmp_table).render(dialect, allowlist, &mut params);

    Ok(QueryFragment {
        dialect,
        sql: format!("{transfers}\nUNION ALL\n{gmp}"),
        params,
    })
}

/// `name`, `schema.name` or `db.schema.name`, each part `[A-Za-z_][A-Za-z0-9_$]*`.
pub fn validate_identifier(name: &str) -> Result<(), BuildError> {
    let parts: Vec<&str> = name.split('.').collect();
    let part_ok = |p: &&str| {
        let mut chars = p.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    if parts.len() > 3 || !parts.iter().all(part_ok) {
        return Err(BuildError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Sources {
        Sources {
            transfers_table: "fact_transfers".into(),
            gmp_table: "fact_gmp".into(),
        }
    }

    fn projected_columns(branch_sql: &str) -> Vec<String> {
        let select = branch_sql
            .split("\nFROM ")
            .next()
            .unwrap()
            .trim_start_matches("SELECT\n");
        select
            .split(",\n")
            .map(|line| line.rsplit(" AS ").next().unwrap().trim().to_string())
            .collect()
    }

    #[test]
    fn test_branches_project_identical_columns() {
        for dialect in [Dialect::Sqlite, Dialect::Snowflake] {
            let allow = Allowlist::new(["0xabc"]).unwrap();
            let view = build_normalized_view(dialect, &sources(), &allow).unwrap();
            let branches: Vec<&str> = view.sql.split("\nUNION ALL\n").collect();
            assert_eq!(branches.len(), 2);
            let expected: Vec<String> = VIEW_COLUMNS.iter().map(ToString::to_string).collect();
            assert_eq!(projected_columns(branches[0]), expected);
            assert_eq!(projected_columns(branches[1]), expected);
        }
    }

    #[test]
    fn test_allowlist_entries_are_bound_per_field() {
        let allow = Allowlist::new(["0xAAA", "0xbbb"]).unwrap();
        let view = build_normalized_view(Dialect::Sqlite, &sources(), &allow).unwrap();
        // One field on transfers, two on GMP.
        assert_eq!(view.params.len(), 2 + 2 * 2);
        assert_eq!(view.sql.matches('?').count(), view.params.len());
        assert_eq!(view.params[0], Param::Text("0xaaa".into()));
        assert!(!view.sql.contains("0xaaa"));
    }

    #[test]
    fn test_status_filters_on_both_branches() {
        let allow = Allowlist::new(["0xabc"]).unwrap();
        let view = build_normalized_view(Dialect::Snowflake, &sources(), &allow).unwrap();
        assert_eq!(view.sql.matches("r.status = 'executed'").count(), 2);
        assert_eq!(view.sql.matches("r.simplified_status = 'received'").count(), 2);
        assert!(view.sql.contains("CONTAINS(LOWER(r.sender_address), ?)"));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("fact_transfers").is_ok());
        assert!(validate_identifier("AXELAR.CORE.FACT_GMP").is_ok());
        assert!(validate_identifier("t; DROP TABLE x").is_err());
        assert!(validate_identifier("a..b").is_err());
        assert!(validate_identifier("a.b.c.d").is_err());
        assert!(validate_identifier("1abc").is_err());

        let bad = Sources {
            transfers_table: "fact_transfers --".into(),
            gmp_table: "fact_gmp".into(),
        };
        let allow = Allowlist::new(["0xabc"]).unwrap();
        assert_eq!(
            build_normalized_view(Dialect::Sqlite, &bad, &allow).unwrap_err(),
            BuildError::InvalidIdentifier("fact_transfers --".into())
        );
    }
}
