//! STS caller identity
//!
//! The identity resource doubles as the connection validation probe: it
//! succeeds only when the credential resolves and AWS accepts it.

use cloudscope_core::error::{Error, Result};
use cloudscope_core::{CallerIdentity, Resource};

use crate::clients::StsClient;
use crate::fetch_error;

pub const CALLER_IDENTITY: &str = "sts.caller_identity";

/// `GetCallerIdentity` for the selected credential and region
pub fn caller_identity() -> Resource<CallerIdentity> {
    Resource::cached(CALLER_IDENTITY, |ctx| async move {
        let client = ctx.client::<StsClient>()?;
        let response = client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| fetch_error(CALLER_IDENTITY, e))?;
        identity_from_parts(response.account(), response.arn(), response.user_id())
    })
}

/// The account id alone
pub fn account_id() -> Resource<String> {
    caller_identity().map(|identity| identity.account_id.clone())
}

fn identity_from_parts(
    account: Option<&str>,
    arn: Option<&str>,
    user_id: Option<&str>,
) -> Result<CallerIdentity> {
    let missing = |field: &str| Error::fetch(CALLER_IDENTITY, format!("Response has no {}", field));
    Ok(CallerIdentity {
        account_id: account.ok_or_else(|| missing("account"))?.to_string(),
        arn: arn.ok_or_else(|| missing("arn"))?.to_string(),
        user_id: user_id.unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudscope_core::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resource_ids() {
        assert_eq!(caller_identity().cached_id(), CALLER_IDENTITY);
        assert!(account_id().is_view());
        assert_eq!(account_id().cached_id(), CALLER_IDENTITY);
    }

    #[test]
    fn test_identity_requires_account_and_arn() {
        let identity = identity_from_parts(
            Some("111122223333"),
            Some("arn:aws:iam::111122223333:user/dev"),
            None,
        )
        .unwrap();
        assert_eq!(identity.account_id, "111122223333");
        assert_eq!(identity.user_id, "");

        let err = identity_from_parts(None, Some("arn"), Some("AIDA")).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Fetch {
                resource_id: CALLER_IDENTITY.into()
            }
        );
        assert!(err.to_string().contains("Response has no account"));
    }
}
