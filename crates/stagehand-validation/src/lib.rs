// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Integrity checks that run against loaded resources.
//!
//! A [`Validator`] holds an ordered, serializable list of [`ValidationRule`]s
//! plus any number of [`CustomRule`] objects, evaluates them against a
//! resource through the [`ResourceGraph`](stagehand_core::ResourceGraph)
//! collaborator, keeps the latest results per resource and publishes the
//! outcome on the event bus.

#![warn(missing_docs)]

mod result;
mod rule;
mod validator;

pub use result::{ValidationResult, ValidationSummary};
pub use rule::{CustomRule, RuleKind, ValidationRule};
pub use validator::{Validator, ValidatorConfig};
