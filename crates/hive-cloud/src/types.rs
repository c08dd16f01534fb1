//! Wire types for the subset of the DigitalOcean v2 API the hive uses.

use hive_core::ImageRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    pub id: u64,
    pub name: String,
    pub fingerprint: String,
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshKeysResponse {
    pub ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub name: String,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesResponse {
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropletStatus {
    New,
    Active,
    Off,
    Archive,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub ip_address: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl NetworkAddress {
    pub fn is_public(&self) -> bool {
        self.kind == "public"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkAddress>,
    #[serde(default)]
    pub v6: Vec<NetworkAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropletResponse {
    pub id: u64,
    pub name: String,
    pub status: DropletStatus,
    #[serde(default)]
    pub networks: Networks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDropletsResponse {
    pub droplets: Vec<DropletResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveDropletResponse {
    pub droplet: DropletResponse,
}

/// Settings shared by every droplet in a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropletConfig {
    pub region: String,
    pub size: String,
    pub image: ImageRef,
    pub ssh_keys: Vec<u64>,
    pub tags: Vec<String>,
}

/// Body of `POST /droplets`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateDropletsRequest<'a> {
    pub image: &'a ImageRef,
    pub names: &'a [String],
    pub region: &'a str,
    pub size: &'a str,
    pub ssh_keys: &'a [u64],
    pub tags: &'a [String],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_droplet_with_networks() {
        let json = r#"{
            "droplet": {
                "id": 3164444,
                "name": "hive-drone",
                "status": "active",
                "created_at": "2020-07-21T18:37:44Z",
                "networks": {
                    "v4": [
                        {"ip_address": "10.128.192.124", "type": "private"},
                        {"ip_address": "192.241.165.154", "type": "public"}
                    ],
                    "v6": [
                        {"ip_address": "2604:a880:0:1010::18a:a001", "type": "public"}
                    ]
                }
            }
        }"#;
        let resp: RetrieveDropletResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.droplet.id, 3164444);
        assert_eq!(resp.droplet.status, DropletStatus::Active);
        assert_eq!(resp.droplet.networks.v4.len(), 2);
        assert!(resp.droplet.networks.v4[1].is_public());
    }

    #[test]
    fn decode_new_droplet_without_networks() {
        let json = r#"{"droplets": [{"id": 1, "name": "a", "status": "new", "networks": {}}]}"#;
        let resp: CreateDropletsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.droplets[0].status, DropletStatus::New);
        assert!(resp.droplets[0].networks.v4.is_empty());
    }

    #[test]
    fn unknown_status_does_not_fail() {
        let json = r#"{"id": 1, "name": "a", "status": "migrating"}"#;
        let droplet: DropletResponse = serde_json::from_str(json).unwrap();
        assert_eq!(droplet.status, DropletStatus::Unknown);
    }

    #[test]
    fn create_request_serializes_image_either_way() {
        let names = vec!["hive-drone".to_string()];
        let tags = vec!["test-hive".to_string()];
        let by_id = ImageRef::Id(42);
        let body = CreateDropletsRequest {
            image: &by_id,
            names: &names,
            region: "nyc1",
            size: "s-1vcpu-1gb",
            ssh_keys: &[7],
            tags: &tags,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["image"], 42);
        assert_eq!(value["ssh_keys"][0], 7);

        let by_slug = ImageRef::Name("ubuntu-24-04-x64".into());
        let body = CreateDropletsRequest { image: &by_slug, ..body };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["image"], "ubuntu-24-04-x64");
        assert_eq!(value["tags"][0], "test-hive");
    }

    #[test]
    fn decode_keys_and_images() {
        let keys: SshKeysResponse = serde_json::from_str(
            r#"{"ssh_keys": [{"id": 512189, "name": "main", "fingerprint": "3b:16:bf"}]}"#,
        )
        .unwrap();
        assert_eq!(keys.ssh_keys[0].name, "main");

        let images: ImagesResponse = serde_json::from_str(
            r#"{"images": [{"id": 9, "name": "drone-prototype", "slug": null}]}"#,
        )
        .unwrap();
        assert_eq!(images.images[0].slug, None);
    }
}
