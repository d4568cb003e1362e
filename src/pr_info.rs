//! Identity of a pull request on the private repository, and the signed
//! links that carry it through the OAuth round trip.

use std::fmt;
use std::str::FromStr;

use crate::crypto::StateTokenManager;
use crate::error::RelayError;
use crate::github::types::PullRequest;

/// `user:org/repo/pr@rev`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrInfo {
    pub user: String,
    pub org: String,
    pub repo: String,
    pub pr: u64,
    pub rev: String,
}

impl PrInfo {
    pub fn new(
        user: impl Into<String>,
        org: impl Into<String>,
        repo: impl Into<String>,
        pr: u64,
        rev: impl Into<String>,
    ) -> Result<Self, RelayError> {
        let info = Self {
            user: user.into(),
            org: org.into(),
            repo: repo.into(),
            pr,
            rev: rev.into(),
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<(), RelayError> {
        let empty = [
            ("user", &self.user),
            ("org", &self.org),
            ("repo", &self.repo),
            ("rev", &self.rev),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());
        if let Some((field, _)) = empty {
            return Err(RelayError::invalid_pr_info(
                self.to_string(),
                format!("{} is empty", field),
            ));
        }
        if self.pr == 0 {
            return Err(RelayError::invalid_pr_info(
                self.to_string(),
                "pull request number must be positive",
            ));
        }
        Ok(())
    }

    /// Whether `s` parses as a complete pull request identity.
    pub fn check(s: &str) -> bool {
        s.parse::<PrInfo>().is_ok()
    }

    /// Identity of a `pull_request` webhook object: the sender, the base
    /// repository and the head revision.
    pub fn from_pull_request(pr: &PullRequest) -> Result<Self, RelayError> {
        let base = pr
            .base
            .repo
            .as_ref()
            .ok_or_else(|| RelayError::missing_field("pull_request.base.repo"))?;
        let (org, repo) = base.full_name.split_once('/').ok_or_else(|| {
            RelayError::InvalidPayload(format!(
                "base repository name {:?} is not owner/repo",
                base.full_name
            ))
        })?;
        Self::new(&pr.user.login, org, repo, pr.number, &pr.head.sha)
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    pub fn pr_url(&self) -> String {
        format!("https://github.com/{}/{}/pull/{}", self.org, self.repo, self.pr)
    }
}

impl fmt::Display for PrInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}/{}@{}", self.user, self.org, self.repo, self.pr, self.rev)
    }
}

impl FromStr for PrInfo {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RelayError::invalid_pr_info(s, reason);

        let (user, rest) = s.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        let mut parts = rest.splitn(3, '/');
        let (Some(org), Some(repo), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected org/repo/pr"));
        };
        let (pr, rev) = rest.split_once('@').ok_or_else(|| invalid("missing '@'"))?;
        let pr = pr
            .parse::<u64>()
            .map_err(|_| invalid("pull request number is not an integer"))?;

        Self::new(user, org, repo, pr, rev).map_err(|_| invalid("empty field or zero pull request number"))
    }
}

/// Builds and reads the signed URLs handed to senders.
#[derive(Debug, Clone)]
pub struct PrLinks {
    tokens: StateTokenManager,
    sender_base: String,
    auth_check_base: String,
}

impl PrLinks {
    pub fn new(tokens: StateTokenManager, sender_base: &str, auth_check_base: &str) -> Self {
        Self {
            tokens,
            sender_base: sender_base.trim_end_matches('/').to_string(),
            auth_check_base: auth_check_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn tokens(&self) -> &StateTokenManager {
        &self.tokens
    }

    pub fn to_token(&self, info: &PrInfo) -> String {
        self.tokens.encode_str(&info.to_string())
    }

    pub fn from_token(&self, token: &str) -> Result<PrInfo, RelayError> {
        self.tokens.decode_str(token)?.parse()
    }

    pub fn auth_url(&self, info: &PrInfo) -> String {
        format!("{}/auth?state={}", self.sender_base, self.to_token(info))
    }

    pub fn hook_url(&self, info: &PrInfo) -> String {
        format!("{}/hook?state={}", self.auth_check_base, self.to_token(info))
    }

    pub fn revoke_url(&self, info: &PrInfo) -> String {
        format!("{}/revoke?state={}", self.auth_check_base, self.to_token(info))
    }
}
