//! IAM account aliases

use cloudscope_core::Resource;

use crate::clients::IamClient;
use crate::fetch_error;

pub const ACCOUNT_ALIASES: &str = "iam.account_aliases";

/// Aliases of the account behind the selected credential.
///
/// IAM is global, so every region of a partition shares one client.
pub fn account_aliases() -> Resource<Vec<String>> {
    Resource::cached(ACCOUNT_ALIASES, |ctx| async move {
        let client = ctx.client::<IamClient>()?;
        let response = client
            .list_account_aliases()
            .send()
            .await
            .map_err(|e| fetch_error(ACCOUNT_ALIASES, e))?;
        Ok(response.account_aliases().to_vec())
    })
}

/// The first alias, if the account has one
pub fn account_alias() -> Resource<Option<String>> {
    account_aliases().map(|aliases| aliases.first().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_is_a_view_of_aliases() {
        let alias = account_alias();
        assert!(alias.is_view());
        assert_eq!(alias.cached_id(), ACCOUNT_ALIASES);
    }
}
