use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ColumnDefinition, ColumnType, TableSchema};

/// A cleaning step the transformer applies to one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanRule {
    Decimal,
    Date,
    TitleCase,
    Lowercase,
    Uppercase,
    Phone,
    Gender,
    ZipCode,
    Default(&'static str),
}

pub type ColumnRules = (&'static str, &'static [CleanRule]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Claims,
    Policies,
    Customers,
    Agents,
    Payments,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown entity {0}, expected one of claims, policies, customers, agents, payments")]
pub struct ParseEntityKindError(pub String);

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Claims,
        EntityKind::Policies,
        EntityKind::Customers,
        EntityKind::Agents,
        EntityKind::Payments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Claims => "claims",
            EntityKind::Policies => "policies",
            EntityKind::Customers => "customers",
            EntityKind::Agents => "agents",
            EntityKind::Payments => "payments",
        }
    }

    pub fn definition(&self) -> EntityDefinition {
        match self {
            EntityKind::Claims => claims(),
            EntityKind::Policies => policies(),
            EntityKind::Customers => customers(),
            EntityKind::Agents => agents(),
            EntityKind::Payments => payments(),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseEntityKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claims" | "claim" => Ok(EntityKind::Claims),
            "policies" | "policy" => Ok(EntityKind::Policies),
            "customers" | "customer" => Ok(EntityKind::Customers),
            "agents" | "agent" => Ok(EntityKind::Agents),
            "payments" | "payment" => Ok(EntityKind::Payments),
            other => Err(ParseEntityKindError(other.to_string())),
        }
    }
}

impl Serialize for EntityKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Everything the pipeline needs to know about one entity.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    pub kind: EntityKind,
    pub schema: TableSchema,
    /// Normalized source header -> canonical column.
    pub aliases: &'static [(&'static str, &'static str)],
    pub rules: &'static [ColumnRules],
}

impl EntityDefinition {
    pub fn default_table(&self) -> &str {
        self.schema.table()
    }

    pub fn required_columns(&self) -> Vec<&str> {
        self.schema.column_names()
    }

    pub fn rules_for(&self, column: &str) -> &'static [CleanRule] {
        self.rules.iter().find(|(name, _)| *name == column).map(|(_, rules)| *rules).unwrap_or(&[])
    }
}

fn fixed_schema(table: &str, merge_key: &str, columns: &[(&str, ColumnType)]) -> TableSchema {
    TableSchema {
        table: table.to_string(),
        columns: columns
            .iter()
            .map(|(name, column_type)| ColumnDefinition {
                name: name.to_string(),
                column_type: *column_type,
                nullable: *name != merge_key,
            })
            .collect(),
        merge_key: merge_key.to_string(),
    }
}

const CLAIMS_RULES: &[ColumnRules] = &[
    ("CLAIM_AMOUNT", &[CleanRule::Decimal, CleanRule::Default("0")]),
    ("CLAIM_DATE", &[CleanRule::Date]),
    ("INCIDENT_DATE", &[CleanRule::Date]),
    ("ADJUSTER_NOTES", &[CleanRule::Default("No notes provided")]),
];

const POLICIES_RULES: &[ColumnRules] = &[
    ("PREMIUM_AMOUNT", &[CleanRule::Decimal, CleanRule::Default("0")]),
    ("EFFECTIVE_DATE", &[CleanRule::Date]),
    ("EXPIRATION_DATE", &[CleanRule::Date]),
];

const CUSTOMERS_RULES: &[ColumnRules] = &[
    ("FIRST_NAME", &[CleanRule::TitleCase]),
    ("LAST_NAME", &[CleanRule::TitleCase]),
    ("DATE_OF_BIRTH", &[CleanRule::Date]),
    ("GENDER", &[CleanRule::Gender]),
    ("EMAIL", &[CleanRule::Lowercase, CleanRule::Default("unknown@example.com")]),
    ("PHONE", &[CleanRule::Phone, CleanRule::Default("000-000-0000")]),
    ("ADDRESS", &[CleanRule::TitleCase, CleanRule::Default("Unknown")]),
    ("CITY", &[CleanRule::TitleCase, CleanRule::Default("Unknown")]),
    ("STATE", &[CleanRule::Uppercase, CleanRule::Default("XX")]),
    ("ZIP_CODE", &[CleanRule::ZipCode, CleanRule::Default("00000")]),
];

const AGENTS_RULES: &[ColumnRules] = &[
    ("FIRST_NAME", &[CleanRule::TitleCase]),
    ("LAST_NAME", &[CleanRule::TitleCase]),
    ("EMAIL", &[CleanRule::Lowercase]),
    ("PHONE", &[CleanRule::Phone]),
    ("AGENCY_NAME", &[CleanRule::Default("Unknown"), CleanRule::TitleCase]),
];

const PAYMENTS_RULES: &[ColumnRules] = &[
    ("PAYMENT_AMOUNT", &[CleanRule::Decimal, CleanRule::Default("0")]),
    ("PAYMENT_DATE", &[CleanRule::Date]),
];

fn varchar(length: u32) -> ColumnType {
    ColumnType::Varchar(Some(length))
}

fn claims() -> EntityDefinition {
    EntityDefinition {
        kind: EntityKind::Claims,
        schema: fixed_schema(
            "raw_claims",
            "CLAIM_ID",
            &[
                ("CLAIM_ID", varchar(10)),
                ("POLICY_ID", varchar(10)),
                ("CUSTOMER_ID", varchar(10)),
                ("CLAIM_AMOUNT", ColumnType::money()),
                ("CLAIM_DATE", ColumnType::Date),
                ("INCIDENT_DATE", ColumnType::Date),
                ("CLAIM_TYPE", varchar(25)),
                ("STATUS", varchar(25)),
                ("ADJUSTER_NOTES", varchar(1000)),
            ],
        ),
        aliases: &[
            ("CLAIMID", "CLAIM_ID"),
            ("CLAIM_NUMBER", "CLAIM_ID"),
            ("ID", "CLAIM_ID"),
            ("POLICYID", "POLICY_ID"),
            ("CUSTOMERID", "CUSTOMER_ID"),
            ("CLAIMAMOUNT", "CLAIM_AMOUNT"),
            ("CLAIMDATE", "CLAIM_DATE"),
            ("INCIDENTDATE", "INCIDENT_DATE"),
            ("CLAIMTYPE", "CLAIM_TYPE"),
            ("ADJUSTERNOTES", "ADJUSTER_NOTES"),
        ],
        rules: CLAIMS_RULES,
    }
}

fn policies() -> EntityDefinition {
    EntityDefinition {
        kind: EntityKind::Policies,
        schema: fixed_schema(
            "raw_policies",
            "POLICY_ID",
            &[
                ("POLICY_ID", varchar(10)),
                ("CUSTOMER_ID", varchar(10)),
                ("POLICY_TYPE", varchar(25)),
                ("EFFECTIVE_DATE", ColumnType::Date),
                ("EXPIRATION_DATE", ColumnType::Date),
                ("PREMIUM_AMOUNT", ColumnType::money()),
                ("STATUS", varchar(25)),
                ("AGENT_ID", varchar(10)),
            ],
        ),
        aliases: &[
            ("POLICYID", "POLICY_ID"),
            ("CUSTOMERID", "CUSTOMER_ID"),
            ("POLICYTYPE", "POLICY_TYPE"),
            ("EFFECTIVEDATE", "EFFECTIVE_DATE"),
            ("EXPIRATIONDATE", "EXPIRATION_DATE"),
            ("PREMIUMAMOUNT", "PREMIUM_AMOUNT"),
            ("AGENTID", "AGENT_ID"),
        ],
        rules: POLICIES_RULES,
    }
}

fn customers() -> EntityDefinition {
    EntityDefinition {
        kind: EntityKind::Customers,
        schema: fixed_schema(
            "raw_customers",
            "CUSTOMER_ID",
            &[
                ("CUSTOMER_ID", varchar(12)),
                ("FIRST_NAME", varchar(50)),
                ("LAST_NAME", varchar(50)),
                ("DATE_OF_BIRTH", ColumnType::Date),
                ("GENDER", varchar(1)),
                ("EMAIL", varchar(255)),
                ("PHONE", varchar(20)),
                ("ADDRESS", varchar(100)),
                ("CITY", varchar(50)),
                ("STATE", varchar(2)),
                ("ZIP_CODE", varchar(5)),
            ],
        ),
        aliases: &[
            ("CUSTOMERID", "CUSTOMER_ID"),
            ("CUST_ID", "CUSTOMER_ID"),
            ("ID", "CUSTOMER_ID"),
            ("FIRSTNAME", "FIRST_NAME"),
            ("LASTNAME", "LAST_NAME"),
            ("DATEOFBIRTH", "DATE_OF_BIRTH"),
            ("EMAILADDRESS", "EMAIL"),
            ("PHONENUMBER", "PHONE"),
            ("ZIP", "ZIP_CODE"),
        ],
        rules: CUSTOMERS_RULES,
    }
}

fn agents() -> EntityDefinition {
    EntityDefinition {
        kind: EntityKind::Agents,
        schema: fixed_schema(
            "raw_agents",
            "AGENT_ID",
            &[
                ("AGENT_ID", varchar(12)),
                ("FIRST_NAME", varchar(50)),
                ("LAST_NAME", varchar(50)),
                ("EMAIL", varchar(255)),
                ("PHONE", varchar(20)),
                ("AGENCY_NAME", varchar(100)),
            ],
        ),
        aliases: &[
            ("AGENTID", "AGENT_ID"),
            ("AGNTID", "AGENT_ID"),
            ("ID", "AGENT_ID"),
            ("FIRSTNAME", "FIRST_NAME"),
            ("LASTNAME", "LAST_NAME"),
            ("AGENTEMAIL", "EMAIL"),
            ("AGENTPHONE", "PHONE"),
            ("AGENCYNAME", "AGENCY_NAME"),
        ],
        rules: AGENTS_RULES,
    }
}

fn payments() -> EntityDefinition {
    EntityDefinition {
        kind: EntityKind::Payments,
        schema: fixed_schema(
            "raw_payments",
            "PAYMENT_ID",
            &[
                ("PAYMENT_ID", varchar(12)),
                ("POLICY_ID", varchar(12)),
                ("PAYMENT_DATE", ColumnType::Date),
                ("PAYMENT_AMOUNT", ColumnType::money()),
                ("PAYMENT_METHOD", varchar(25)),
                ("STATUS", varchar(25)),
            ],
        ),
        aliases: &[
            ("PAYMENTID", "PAYMENT_ID"),
            ("POLICYID", "POLICY_ID"),
            ("PAYMENTDATE", "PAYMENT_DATE"),
            ("PAYMENTAMOUNT", "PAYMENT_AMOUNT"),
            ("PAYMENTMETHOD", "PAYMENT_METHOD"),
        ],
        rules: PAYMENTS_RULES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entity_has_a_consistent_definition() {
        for kind in EntityKind::ALL {
            let definition = kind.definition();
            let schema = &definition.schema;

            assert_eq!(definition.kind, kind);
            assert!(schema.column(schema.merge_key()).is_some(), "{kind} merge key not declared");

            for (_, canonical) in definition.aliases {
                assert!(schema.column(canonical).is_some(), "{kind} alias targets {canonical}");
            }
            for (column, _) in definition.rules {
                assert!(schema.column(column).is_some(), "{kind} rule targets {column}");
            }
        }
    }

    #[test]
    fn test_parse_entity_kind() {
        assert_eq!(" Claims ".parse::<EntityKind>(), Ok(EntityKind::Claims));
        assert_eq!("policy".parse::<EntityKind>(), Ok(EntityKind::Policies));
        assert_eq!(
            "vehicles".parse::<EntityKind>(),
            Err(ParseEntityKindError("vehicles".to_string()))
        );
    }

    #[test]
    fn test_entity_kind_yaml() {
        let kinds: Vec<EntityKind> = serde_yaml::from_str("[claims, PAYMENTS]").unwrap();
        assert_eq!(kinds, vec![EntityKind::Claims, EntityKind::Payments]);
    }

    #[test]
    fn test_claims_definition() {
        let definition = EntityKind::Claims.definition();
        assert_eq!(definition.default_table(), "raw_claims");
        assert_eq!(definition.schema.merge_key(), "CLAIM_ID");
        assert_eq!(definition.required_columns().len(), 9);
        assert_eq!(
            definition.rules_for("ADJUSTER_NOTES"),
            &[CleanRule::Default("No notes provided")]
        );
        assert!(definition.rules_for("STATUS").is_empty());
    }
}
