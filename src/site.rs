use crate::config;
use crate::model::Mailbox;
use crate::normalize::SiteIdentity;

/// Process-wide site identity, read from the `site` config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    pub name: String,
    pub home_url: String,
    pub from_email: Option<String>,
    pub logo_url: Option<String>,
}

impl SiteProfile {
    pub fn from_config(site: &config::Site) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Self {
            name: site.name.clone(),
            home_url: site.home_url.clone(),
            from_email: non_empty(&site.from_email),
            logo_url: non_empty(&site.logo_url),
        }
    }

    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.home_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    /// Configured sender, or `noreply@<site host>`.
    pub fn noreply_address(&self) -> String {
        match &self.from_email {
            Some(email) => email.trim().to_string(),
            None => format!(
                "noreply@{}",
                self.host().unwrap_or_else(|| "localhost.localdomain".into())
            ),
        }
    }

    pub fn sender(&self) -> Mailbox {
        Mailbox::named(self.noreply_address(), self.name.clone())
    }
}

impl SiteIdentity for SiteProfile {
    fn default_from_name(&self) -> String {
        self.name.clone()
    }

    fn default_from_email(&self) -> String {
        self.noreply_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(from_email: Option<&str>) -> SiteProfile {
        SiteProfile::from_config(&config::Site {
            name: "Forum".into(),
            home_url: "https://forum.example.com/community/".into(),
            from_email: from_email.map(str::to_string),
            logo_url: Some("".into()),
        })
    }

    #[test]
    fn noreply_uses_home_host() {
        let profile = site(None);
        assert_eq!(profile.noreply_address(), "noreply@forum.example.com");
        assert_eq!(profile.logo_url, None);
        assert_eq!(profile.sender().formatted(), "Forum <noreply@forum.example.com>");
    }

    #[test]
    fn configured_sender_wins() {
        let profile = site(Some("news@example.com"));
        assert_eq!(profile.default_from_email(), "news@example.com");
        assert_eq!(profile.default_from_name(), "Forum");
    }
}
