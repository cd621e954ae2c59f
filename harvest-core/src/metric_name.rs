// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{borrow::Cow, fmt};

/// Key of a metric: a name and an optional scope.
///
/// An empty scope is the same as no scope, so `MetricName::scoped("", "x")` and
/// `MetricName::unscoped("x")` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName {
    name: Cow<'static, str>,
    scope: Option<Cow<'static, str>>,
}

impl MetricName {
    /// A metric that is not attached to any transaction scope
    pub fn unscoped(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    /// A metric recorded within `scope`
    pub fn scoped(scope: impl Into<Cow<'static, str>>, name: impl Into<Cow<'static, str>>) -> Self {
        let scope = scope.into();
        Self {
            name: name.into(),
            scope: (!scope.is_empty()).then_some(scope),
        }
    }

    /// The metric name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope, if any
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Splits this key into its name and scope
    pub fn into_parts(self) -> (Cow<'static, str>, Option<Cow<'static, str>>) {
        (self.name, self.scope)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}[{}]", self.name, scope),
            None => f.write_str(&self.name),
        }
    }
}
