//! Method-level authorization.
//!
//! A policy is a set of public methods plus a role-requirement table. Method
//! names are matched exactly on the bare RPC name, so
//! `/product.v1.ProductService/GetProduct` and `GetProduct` are the same
//! method and `GetProductReviews` is a different one.
//!
//! Policies are built once at startup and are read-only afterwards.

use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { required_role: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Methods that require one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    role: String,
    methods: BTreeSet<String>,
}

impl PolicyRule {
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    pub fn applies_to(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

/// Rejected policy table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("method name is empty")]
    EmptyMethod,

    #[error("role name is empty")]
    EmptyRole,

    #[error("method '{method}' requires both '{first}' and '{second}'")]
    ConflictingRoles {
        method: String,
        first: String,
        second: String,
    },

    #[error("method '{method}' is public but also requires '{role}'")]
    PublicAndRestricted { method: String, role: String },
}

/// Last path segment of a gRPC method path. Bare names pass through.
pub fn bare_method_name(method: &str) -> &str {
    method.rsplit('/').next().unwrap_or(method)
}

/// Builder for [`PolicyEvaluator`].
///
/// Rules keep the order in which their roles were first declared.
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    public: BTreeSet<String>,
    rules: Vec<PolicyRule>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exempt `methods` from authentication.
    pub fn public<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.public
            .extend(methods.into_iter().map(|m| bare_method_name(m.as_ref()).to_string()));
        self
    }

    /// Require `role` for `methods`. Repeated calls for one role merge.
    pub fn require_role<I, S>(mut self, role: &str, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let methods = methods
            .into_iter()
            .map(|m| bare_method_name(m.as_ref()).to_string());

        match self.rules.iter_mut().find(|r| r.role == role) {
            Some(rule) => rule.methods.extend(methods),
            None => self.rules.push(PolicyRule {
                role: role.to_string(),
                methods: methods.collect(),
            }),
        }
        self
    }

    /// Validate and freeze the table.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] for empty names, a method listed under two
    /// roles, or a method that is both public and restricted.
    pub fn build(self) -> Result<PolicyEvaluator, PolicyError> {
        if self.public.iter().any(String::is_empty) {
            return Err(PolicyError::EmptyMethod);
        }

        let mut owner: HashMap<&str, &str> = HashMap::new();
        for rule in &self.rules {
            if rule.role.is_empty() {
                return Err(PolicyError::EmptyRole);
            }
            for method in &rule.methods {
                if method.is_empty() {
                    return Err(PolicyError::EmptyMethod);
                }
                if self.public.contains(method) {
                    return Err(PolicyError::PublicAndRestricted {
                        method: method.clone(),
                        role: rule.role.clone(),
                    });
                }
                if let Some(first) = owner.insert(method, &rule.role) {
                    return Err(PolicyError::ConflictingRoles {
                        method: method.clone(),
                        first: first.to_string(),
                        second: rule.role.clone(),
                    });
                }
            }
        }

        Ok(PolicyEvaluator {
            public: self.public.into_iter().collect(),
            rules: self.rules,
        })
    }
}

/// Decides whether a caller may invoke a method.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    public: HashSet<String>,
    rules: Vec<PolicyRule>,
}

impl PolicyEvaluator {
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// Table of the storefront deployment.
    pub fn default_storefront() -> Result<Self, PolicyError> {
        Self::builder()
            .public([
                "GetProduct",
                "ListProducts",
                "ListCategories",
                "SearchProducts",
                "GetRecommendations",
            ])
            .require_role(
                "seller",
                ["CreateProduct", "UpdateProduct", "UpdateStock", "ListSellerOrders"],
            )
            .require_role("admin", ["ListAllUsers", "ApproveSeller", "GetAnalytics"])
            .build()
    }

    /// Whether `method` needs no authentication.
    pub fn is_public(&self, method: &str) -> bool {
        self.public.contains(bare_method_name(method))
    }

    /// Role `method` requires, if any.
    pub fn required_role(&self, method: &str) -> Option<&str> {
        let method = bare_method_name(method);
        self.rules
            .iter()
            .find(|rule| rule.applies_to(method))
            .map(PolicyRule::role)
    }

    /// Decide for a caller holding `roles`.
    ///
    /// Public methods and methods without a rule are allowed.
    pub fn authorize(&self, method: &str, roles: &[String]) -> Decision {
        if self.is_public(method) {
            return Decision::Allow;
        }

        match self.required_role(method) {
            Some(required) if !roles.iter().any(|r| r == required) => {
                tracing::debug!(
                    target: "gateway.policy",
                    method = bare_method_name(method),
                    required_role = required,
                    "Caller lacks required role"
                );
                Decision::Deny {
                    required_role: required.to_string(),
                }
            }
            _ => Decision::Allow,
        }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }
}
