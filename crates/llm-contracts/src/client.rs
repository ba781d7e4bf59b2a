// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::types::LLMResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Stateless prompt-in, completion-out text generation.
///
/// Implementations must not keep conversational state between calls; every
/// prompt carries all the context the service needs.
#[async_trait]
pub trait TextGenerationClient: Send + Sync {
    async fn invoke(&self, prompt: &str) -> LLMResult<String>;

    fn model_name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<T: TextGenerationClient + ?Sized> TextGenerationClient for Arc<T> {
    async fn invoke(&self, prompt: &str) -> LLMResult<String> {
        (**self).invoke(prompt).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
