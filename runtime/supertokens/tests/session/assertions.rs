use googletest::matcher::{self, Matcher, MatcherBase};
use supertokens::framework::OutgoingCookie;

/// Check if the cookie asks the client to delete the token it carries.
pub fn is_removal_cookie() -> RemovalCookieMatcher {
    RemovalCookieMatcher
}

#[derive(Clone, Copy, matcher::MatcherBase)]
pub struct RemovalCookieMatcher;

impl Matcher<&OutgoingCookie> for RemovalCookieMatcher {
    fn matches(&self, actual: &OutgoingCookie) -> matcher::MatcherResult {
        (actual.is_removal() && actual.value.is_empty()).into()
    }

    fn describe(
        &self,
        matcher_result: matcher::MatcherResult,
    ) -> googletest::description::Description {
        match matcher_result {
            matcher::MatcherResult::Match => "is a removal cookie",
            matcher::MatcherResult::NoMatch => "isn't a removal cookie",
        }
        .into()
    }
}

/// Check that a session error has the expected protocol-level kind,
/// e.g. `TRY_REFRESH_TOKEN`.
pub fn has_kind(kind: &'static str) -> ErrorKindMatcher {
    ErrorKindMatcher { kind }
}

#[derive(Clone, Copy, matcher::MatcherBase)]
pub struct ErrorKindMatcher {
    kind: &'static str,
}

impl Matcher<&supertokens::session::SessionError> for ErrorKindMatcher {
    fn matches(&self, actual: &supertokens::session::SessionError) -> matcher::MatcherResult {
        (actual.kind() == self.kind).into()
    }

    fn describe(
        &self,
        matcher_result: matcher::MatcherResult,
    ) -> googletest::description::Description {
        match matcher_result {
            matcher::MatcherResult::Match => format!("is a {} error", self.kind),
            matcher::MatcherResult::NoMatch => format!("isn't a {} error", self.kind),
        }
        .into()
    }
}
