use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
pub struct SendEmailResponse {
    #[serde(default, alias = "message_id")]
    pub id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SendingDomain {
    #[serde(alias = "domain")]
    pub name: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Deserialize, Debug)]
pub struct SendingDomainsResp {
    #[serde(default)]
    pub data: Vec<SendingDomain>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeyInfo {
    #[serde(default, alias = "name")]
    pub label: Option<String>,
}
