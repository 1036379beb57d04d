//! vCloud Director parameter objects sent as request payloads.
//!
//! Element and attribute names follow the vCloud XML schema; sizes are in
//! megabytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::Error;
use crate::payload::Payload;

/// XML form of a parameter object, rooted at the type's schema element.
pub trait XmlParams: Serialize + DeserializeOwned {
    fn to_xml(&self) -> Result<String> {
        quick_xml::se::to_string(self).map_err(|source| Error::XmlEncode { source })
    }

    fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|source| Error::XmlDecode { source })
    }

    /// Encodes `self` as a sized payload of the given vCloud media type.
    fn to_payload(&self, media_type: &str) -> Result<Payload> {
        Ok(Payload::from_string(self.to_xml()?).with_content_type(media_type))
    }
}

/// Link to another vCloud entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
}

impl Reference {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            name: None,
            media_type: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "Disk")]
pub struct Disk {
    #[serde(rename = "@instanceId", default, skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(rename = "Size")]
    size: u64,
}

impl Disk {
    pub fn new(instance_id: Option<String>, size: u64) -> Self {
        Self { instance_id, size }
    }

    pub fn builder() -> DiskBuilder {
        DiskBuilder::default()
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiskBuilder {
    instance_id: Option<String>,
    size: Option<u64>,
}

impl DiskBuilder {
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn build(self) -> Result<Disk> {
        let size = self.size.ok_or(Error::MissingField {
            object: "Disk",
            field: "Size",
        })?;
        Ok(Disk::new(self.instance_id, size))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "HardwareCustomization")]
pub struct HardwareCustomization {
    #[serde(rename = "Disk")]
    disk: Disk,
}

impl HardwareCustomization {
    pub fn new(disk: Disk) -> Self {
        Self { disk }
    }

    pub fn builder() -> HardwareCustomizationBuilder {
        HardwareCustomizationBuilder::default()
    }

    pub fn disk(&self) -> &Disk {
        &self.disk
    }
}

#[derive(Clone, Debug, Default)]
pub struct HardwareCustomizationBuilder {
    disk: Option<Disk>,
}

impl HardwareCustomizationBuilder {
    pub fn disk(mut self, instance_id: impl Into<String>, size_mb: u64) -> Self {
        self.disk = Some(Disk::new(Some(instance_id.into()), size_mb));
        self
    }

    pub fn with_disk(mut self, disk: Disk) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn build(self) -> Result<HardwareCustomization> {
        let disk = self.disk.ok_or(Error::MissingField {
            object: "HardwareCustomization",
            field: "Disk",
        })?;
        Ok(HardwareCustomization::new(disk))
    }
}

/// Describes a VM to instantiate from an existing source VM or template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "SourcedVmInstantiationParams")]
pub struct SourcedVmInstantiationParams {
    #[serde(rename = "Source")]
    source: Reference,
    #[serde(
        rename = "HardwareCustomization",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    hardware_customization: Option<HardwareCustomization>,
}

impl SourcedVmInstantiationParams {
    pub fn new(source: Reference) -> Self {
        Self {
            source,
            hardware_customization: None,
        }
    }

    pub fn builder() -> SourcedVmInstantiationParamsBuilder {
        SourcedVmInstantiationParamsBuilder::default()
    }

    pub fn source(&self) -> &Reference {
        &self.source
    }

    pub fn hardware_customization(&self) -> Option<&HardwareCustomization> {
        self.hardware_customization.as_ref()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SourcedVmInstantiationParamsBuilder {
    source: Option<Reference>,
    hardware_customization: Option<HardwareCustomization>,
}

impl SourcedVmInstantiationParamsBuilder {
    pub fn source(mut self, source: Reference) -> Self {
        self.source = Some(source);
        self
    }

    pub fn hardware_customization(mut self, hardware_customization: HardwareCustomization) -> Self {
        self.hardware_customization = Some(hardware_customization);
        self
    }

    pub fn build(self) -> Result<SourcedVmInstantiationParams> {
        let source = self.source.ok_or(Error::MissingField {
            object: "SourcedVmInstantiationParams",
            field: "Source",
        })?;
        Ok(SourcedVmInstantiationParams {
            source,
            hardware_customization: self.hardware_customization,
        })
    }
}

impl XmlParams for Reference {}

impl XmlParams for Disk {}

impl XmlParams for HardwareCustomization {}

impl XmlParams for SourcedVmInstantiationParams {}

#[cfg(test)]
mod tests {
    use super::{Disk, HardwareCustomization, Reference, SourcedVmInstantiationParams, XmlParams};
    use crate::ErrorCode;

    #[test]
    fn hardware_customization_builder_sets_disk_in_megabytes() {
        let customization = HardwareCustomization::builder()
            .disk("2000", 20_480)
            .build()
            .expect("disk given");

        assert_eq!(customization.disk().instance_id(), Some("2000"));
        assert_eq!(customization.disk().size(), 20_480);
    }

    #[test]
    fn builders_report_missing_required_fields() {
        let error = Disk::builder()
            .instance_id("2000")
            .build()
            .expect_err("size is required");
        assert_eq!(error.code(), ErrorCode::MissingField);
        assert_eq!(error.to_string(), "Disk is missing required field Size");

        let error = SourcedVmInstantiationParams::builder()
            .build()
            .expect_err("source is required");
        assert_eq!(
            error.to_string(),
            "SourcedVmInstantiationParams is missing required field Source"
        );
    }

    #[test]
    fn disk_instance_id_is_an_attribute() {
        let disk = Disk::builder()
            .instance_id("2000")
            .size(4096)
            .build()
            .expect("disk");

        let xml = disk.to_xml().expect("encode");

        assert_eq!(xml, r#"<Disk instanceId="2000"><Size>4096</Size></Disk>"#);
        assert_eq!(Disk::from_xml(&xml).expect("decode"), disk);
    }

    #[test]
    fn sourced_params_use_schema_elements() {
        let params = SourcedVmInstantiationParams::builder()
            .source(
                Reference::new("https://vcd.example.com/api/vApp/vm-7")
                    .with_name("template-vm")
                    .with_media_type("application/vnd.vmware.vcloud.vm+xml"),
            )
            .hardware_customization(HardwareCustomization::new(Disk::new(None, 1024)))
            .build()
            .expect("params");

        let xml = params.to_xml().expect("encode");

        assert!(xml.starts_with("<SourcedVmInstantiationParams>"), "{xml}");
        assert!(
            xml.contains(
                r#"<Source href="https://vcd.example.com/api/vApp/vm-7" name="template-vm" type="application/vnd.vmware.vcloud.vm+xml""#
            ),
            "{xml}"
        );
        assert!(
            xml.contains(
                "<HardwareCustomization><Disk><Size>1024</Size></Disk></HardwareCustomization>"
            ),
            "{xml}"
        );
        assert_eq!(
            SourcedVmInstantiationParams::from_xml(&xml).expect("decode"),
            params
        );
    }

    #[test]
    fn decoding_ignores_namespace_declarations() {
        let disk = Disk::from_xml(
            r#"<Disk xmlns="http://www.vmware.com/vcloud/v1.5" instanceId="2001"><Size>2048</Size></Disk>"#,
        )
        .expect("decode");

        assert_eq!(disk.instance_id(), Some("2001"));
        assert_eq!(disk.size(), 2048);
    }

    #[test]
    fn malformed_size_is_a_decode_error() {
        let error = Disk::from_xml("<Disk><Size>lots</Size></Disk>").expect_err("not a number");
        assert_eq!(error.code(), ErrorCode::XmlDecode);
    }

    #[test]
    fn payload_carries_media_type_and_length() {
        let disk = Disk::new(Some("2000".to_owned()), 4096);

        let payload = disk
            .to_payload("application/vnd.vmware.vcloud.disk+xml")
            .expect("payload");

        let xml = disk.to_xml().expect("encode");
        assert_eq!(
            payload.metadata().content_type(),
            Some("application/vnd.vmware.vcloud.disk+xml")
        );
        assert_eq!(payload.metadata().length(), Some(xml.len() as u64));
        assert_eq!(payload.text().expect("read"), xml);
    }
}
