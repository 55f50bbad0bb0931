//! Built-in topic catalog and invalidation rules for the endowment
//! management domain (beneficiaries, properties, contracts, accounting).
//!
//! The catalog is returned as fresh values on every call; nothing here is a
//! process-wide singleton.

use crate::error::ConfigError;
use crate::registry::TopicRegistry;
use crate::rule::{InvalidationRule, Predicate};
use crate::rule_table::RuleTable;
use crate::topic::KeyBuilder;

/// Topic names known to the catalog.
pub mod topics {
    // Beneficiaries
    pub const BENEFICIARIES: &str = "BENEFICIARIES";
    pub const BENEFICIARY: &str = "BENEFICIARY";
    pub const BENEFICIARY_STATS: &str = "BENEFICIARY_STATS";
    pub const FAMILIES: &str = "FAMILIES";
    pub const DISTRIBUTIONS: &str = "DISTRIBUTIONS";
    pub const DISTRIBUTION_SUMMARY: &str = "DISTRIBUTION_SUMMARY";
    pub const LOANS: &str = "LOANS";

    // Real estate
    pub const PROPERTIES: &str = "PROPERTIES";
    pub const PROPERTY: &str = "PROPERTY";
    pub const PROPERTY_UNITS: &str = "PROPERTY_UNITS";
    pub const PROPERTY_STATS: &str = "PROPERTY_STATS";
    pub const TENANTS: &str = "TENANTS";
    pub const CONTRACTS: &str = "CONTRACTS";
    pub const CONTRACT: &str = "CONTRACT";
    pub const RENTAL_PAYMENTS: &str = "RENTAL_PAYMENTS";
    pub const MAINTENANCE_REQUESTS: &str = "MAINTENANCE_REQUESTS";

    // Accounting
    pub const INVOICES: &str = "INVOICES";
    pub const PAYMENT_VOUCHERS: &str = "PAYMENT_VOUCHERS";
    pub const JOURNAL_ENTRIES: &str = "JOURNAL_ENTRIES";
    pub const ACCOUNTS: &str = "ACCOUNTS";
    pub const ACCOUNT_LEDGER: &str = "ACCOUNT_LEDGER";
    pub const TRIAL_BALANCE: &str = "TRIAL_BALANCE";
    pub const INCOME_STATEMENT: &str = "INCOME_STATEMENT";
    pub const BANK_ACCOUNTS: &str = "BANK_ACCOUNTS";
    pub const FISCAL_YEARS: &str = "FISCAL_YEARS";
    pub const FISCAL_YEAR_CLOSING: &str = "FISCAL_YEAR_CLOSING";

    // Platform
    pub const DASHBOARD_KPIS: &str = "DASHBOARD_KPIS";
    pub const NOTIFICATIONS: &str = "NOTIFICATIONS";
    pub const AUDIT_LOGS: &str = "AUDIT_LOGS";
    pub const USERS: &str = "USERS";
    pub const ROLES: &str = "ROLES";
}

use topics::*;

/// Build the catalog's topic registry.
pub fn registry() -> Result<TopicRegistry, ConfigError> {
    TopicRegistry::builder()
        .static_topic(BENEFICIARIES, ["beneficiaries"])
        .parameterized(
            BENEFICIARY,
            ["beneficiary"],
            KeyBuilder::from_fields(&["beneficiary_id"]),
        )
        .static_topic(BENEFICIARY_STATS, ["beneficiaries", "stats"])
        .static_topic(FAMILIES, ["families"])
        .static_topic(DISTRIBUTIONS, ["distributions"])
        .static_topic(DISTRIBUTION_SUMMARY, ["distributions", "summary"])
        .static_topic(LOANS, ["loans"])
        .static_topic(PROPERTIES, ["properties"])
        .parameterized(
            PROPERTY,
            ["property"],
            KeyBuilder::from_fields(&["property_id"]),
        )
        .parameterized(
            PROPERTY_UNITS,
            ["property-units"],
            KeyBuilder::from_fields(&["property_id"]),
        )
        .static_topic(PROPERTY_STATS, ["properties", "stats"])
        .static_topic(TENANTS, ["tenants"])
        .static_topic(CONTRACTS, ["contracts"])
        .parameterized(
            CONTRACT,
            ["contract"],
            KeyBuilder::from_fields(&["contract_id"]),
        )
        .static_topic(RENTAL_PAYMENTS, ["rental-payments"])
        .static_topic(MAINTENANCE_REQUESTS, ["maintenance-requests"])
        .static_topic(INVOICES, ["invoices"])
        .static_topic(PAYMENT_VOUCHERS, ["payment-vouchers"])
        .static_topic(JOURNAL_ENTRIES, ["journal-entries"])
        .static_topic(ACCOUNTS, ["accounts"])
        .parameterized(
            ACCOUNT_LEDGER,
            ["account-ledger"],
            KeyBuilder::from_fields(&["account_id"]),
        )
        .static_topic(TRIAL_BALANCE, ["trial-balance"])
        .static_topic(INCOME_STATEMENT, ["income-statement"])
        .static_topic(BANK_ACCOUNTS, ["bank-accounts"])
        .static_topic(FISCAL_YEARS, ["fiscal-years"])
        .parameterized(
            FISCAL_YEAR_CLOSING,
            ["fiscal-year-closing"],
            KeyBuilder::from_fields(&["fiscal_year_id"]),
        )
        .static_topic(DASHBOARD_KPIS, ["dashboard", "kpis"])
        .static_topic(NOTIFICATIONS, ["notifications"])
        .static_topic(AUDIT_LOGS, ["audit-logs"])
        .static_topic(USERS, ["users"])
        .static_topic(ROLES, ["roles"])
        .build()
}

/// Build the catalog's invalidation rules.
pub fn rules() -> RuleTable {
    RuleTable::new(vec![
        InvalidationRule::when_written(BENEFICIARIES)
            .affects([BENEFICIARY, BENEFICIARY_STATS, FAMILIES, DASHBOARD_KPIS])
            .describe("Beneficiary edits change per-record views, counters and family groupings"),
        InvalidationRule::when_written(DISTRIBUTIONS)
            .affects([
                DISTRIBUTION_SUMMARY,
                BENEFICIARIES,
                BENEFICIARY,
                PAYMENT_VOUCHERS,
                DASHBOARD_KPIS,
            ])
            .describe("Distributions update beneficiary balances and generate vouchers"),
        InvalidationRule::when_written(LOANS)
            .affects([BENEFICIARY, BENEFICIARY_STATS, BANK_ACCOUNTS])
            .describe("Loans move money out of bank accounts on behalf of beneficiaries"),
        InvalidationRule::when_written(PROPERTIES)
            .affects([PROPERTY, PROPERTY_UNITS, PROPERTY_STATS, DASHBOARD_KPIS])
            .describe("Property edits change listings, units and occupancy figures"),
        InvalidationRule::when_written(CONTRACTS)
            .affects([PROPERTY_STATS, RENTAL_PAYMENTS])
            .only_if(Predicate::field_in("status", &["active", "expired"]))
            .describe("Only active or expired contracts affect occupancy and rent schedules"),
        InvalidationRule::when_written(CONTRACTS)
            .affects([CONTRACT, PROPERTY_UNITS, PROPERTY_STATS, DASHBOARD_KPIS])
            .only_if(Predicate::field_in("status", &["terminated", "renewed"]))
            .describe("Terminations and renewals free or re-occupy units"),
        InvalidationRule::when_written(TENANTS)
            .affects([CONTRACTS, CONTRACT])
            .describe("Tenant details are shown on contract screens"),
        InvalidationRule::when_written([RENTAL_PAYMENTS, INVOICES])
            .affects([
                CONTRACT,
                JOURNAL_ENTRIES,
                ACCOUNT_LEDGER,
                TRIAL_BALANCE,
                DASHBOARD_KPIS,
            ])
            .describe("Collections post journal entries and move account balances"),
        InvalidationRule::when_written(MAINTENANCE_REQUESTS)
            .affects([PROPERTY])
            .describe("Open maintenance requests are listed per property"),
        InvalidationRule::when_written(MAINTENANCE_REQUESTS)
            .affects([INVOICES, PAYMENT_VOUCHERS])
            .only_if(Predicate::flag("billable"))
            .describe("Billable maintenance produces invoices and vouchers"),
        InvalidationRule::when_written(PAYMENT_VOUCHERS)
            .affects([JOURNAL_ENTRIES, ACCOUNT_LEDGER, TRIAL_BALANCE, BANK_ACCOUNTS])
            .describe("Vouchers are posted to the journal and debit bank accounts"),
        InvalidationRule::when_written(JOURNAL_ENTRIES)
            .affects([ACCOUNT_LEDGER])
            .describe("Every journal change shows up in account ledgers"),
        InvalidationRule::when_written(JOURNAL_ENTRIES)
            .affects([ACCOUNTS, TRIAL_BALANCE, INCOME_STATEMENT, DASHBOARD_KPIS])
            .only_if(Predicate::field_in("status", &["posted", "reversed"]))
            .describe("Only posted or reversed entries move balances"),
        InvalidationRule::when_written(ACCOUNTS)
            .affects([ACCOUNT_LEDGER, TRIAL_BALANCE, INCOME_STATEMENT])
            .describe("Chart of accounts changes regroup financial reports"),
        InvalidationRule::when_written(FISCAL_YEARS)
            .affects([FISCAL_YEAR_CLOSING, TRIAL_BALANCE, INCOME_STATEMENT])
            .describe("Opening or closing a fiscal year changes report periods"),
        InvalidationRule::when_written(ROLES)
            .affects([USERS])
            .describe("User listings show role names"),
    ])
}

/// Build the registry and rule table and check them against each other.
///
/// Call once at startup; a failure here is a configuration bug.
pub fn validated() -> Result<(TopicRegistry, RuleTable), ConfigError> {
    let registry = registry()?;
    let rules = rules();
    rules.validate(&registry)?;
    Ok((registry, rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::RuleResolver;
    use crate::topic::TopicKey;
    use serde_json::json;

    #[test]
    fn test_catalog_rules_reference_registered_topics() {
        let (registry, rules) = validated().unwrap();
        assert!(!rules.is_empty());
        assert!(registry.len() >= 30);
    }

    #[test]
    fn test_every_declared_constant_is_registered() {
        let registry = registry().unwrap();
        for name in [
            BENEFICIARIES, BENEFICIARY, BENEFICIARY_STATS, FAMILIES, DISTRIBUTIONS,
            DISTRIBUTION_SUMMARY, LOANS, PROPERTIES, PROPERTY, PROPERTY_UNITS, PROPERTY_STATS,
            TENANTS, CONTRACTS, CONTRACT, RENTAL_PAYMENTS, MAINTENANCE_REQUESTS, INVOICES,
            PAYMENT_VOUCHERS, JOURNAL_ENTRIES, ACCOUNTS, ACCOUNT_LEDGER, TRIAL_BALANCE,
            INCOME_STATEMENT, BANK_ACCOUNTS, FISCAL_YEARS, FISCAL_YEAR_CLOSING, DASHBOARD_KPIS,
            NOTIFICATIONS, AUDIT_LOGS, USERS, ROLES,
        ] {
            assert!(registry.contains(name), "{} missing from registry", name);
        }
    }

    #[test]
    fn test_contract_status_gating() {
        let resolver = RuleResolver::new(rules());

        let active = resolver.affected_topics(CONTRACTS, Some(&json!({"status": "active"})));
        assert_eq!(
            active.into_vec(),
            vec![CONTRACTS, PROPERTY_STATS, RENTAL_PAYMENTS]
        );

        let draft = resolver.affected_topics(CONTRACTS, Some(&json!({"status": "draft"})));
        assert_eq!(draft.into_vec(), vec![CONTRACTS]);
    }

    #[test]
    fn test_users_have_no_rules() {
        let resolver = RuleResolver::new(rules());
        assert_eq!(resolver.affected_topics(USERS, None).into_vec(), vec![USERS]);
    }

    #[test]
    fn test_tenant_write_does_not_chain_into_contract_rules() {
        let resolver = RuleResolver::new(rules());
        let resolution = resolver.affected_topics(TENANTS, Some(&json!({"status": "active"})));
        assert!(resolution.contains(CONTRACTS));
        assert!(!resolution.contains(RENTAL_PAYMENTS));
    }

    #[test]
    fn test_parameterized_topics_resolve_to_families() {
        let registry = registry().unwrap();
        assert!(matches!(
            registry.topic_key(BENEFICIARY).unwrap(),
            TopicKey::Family(_)
        ));
        assert!(matches!(
            registry.topic_key(BENEFICIARIES).unwrap(),
            TopicKey::Exact(_)
        ));
    }
}
