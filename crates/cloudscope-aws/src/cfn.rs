//! CloudFormation stack outputs
//!
//! Outputs of a stack are fetched together and cached under the stack name;
//! a single output is a view over them.

use cloudscope_core::error::{Error, Result};
use cloudscope_core::Resource;
use indexmap::IndexMap;

use crate::clients::CfnClient;
use crate::fetch_error;

fn resource_id(stack_name: &str) -> String {
    format!("cfn.stack_outputs:{}", stack_name)
}

/// Every output of `stack_name`, in template order
pub fn stack_outputs(stack_name: impl Into<String>) -> Resource<IndexMap<String, String>> {
    let stack_name = stack_name.into();
    let id = resource_id(&stack_name);
    Resource::cached(id.clone(), move |ctx| {
        let stack_name = stack_name.clone();
        let id = id.clone();
        async move {
            let client = ctx.client::<CfnClient>()?;
            let response = client
                .describe_stacks()
                .stack_name(&stack_name)
                .send()
                .await
                .map_err(|e| fetch_error(&id, e))?;

            let stack = response.stacks().first().ok_or_else(|| {
                Error::fetch(&id, format!("CloudFormation stack '{}' not found", stack_name))
            })?;
            Ok(collect_outputs(
                stack
                    .outputs()
                    .iter()
                    .map(|o| (o.output_key(), o.output_value())),
            ))
        }
    })
}

/// One output; `None` when the stack exists but has no such output
pub fn stack_output(
    stack_name: impl Into<String>,
    output_key: impl Into<String>,
) -> Resource<Option<String>> {
    let output_key = output_key.into();
    stack_outputs(stack_name).map(move |outputs| outputs.get(&output_key).cloned())
}

/// Split a `stack-name/OutputKey` reference
pub fn parse_output_ref(reference: &str) -> Result<(String, String)> {
    match reference.split_once('/') {
        Some((stack, key)) if !stack.is_empty() && !key.is_empty() => {
            Ok((stack.to_string(), key.to_string()))
        }
        _ => Err(Error::parse(format!(
            "CloudFormation reference must be in stack-name/OutputKey format: {}",
            reference
        ))
        .with_help("Example: my-stack/BucketName")),
    }
}

fn collect_outputs<'a>(
    outputs: impl IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
) -> IndexMap<String, String> {
    outputs
        .into_iter()
        .filter_map(|(key, value)| Some((key?.to_string(), value?.to_string())))
        .collect()
}
