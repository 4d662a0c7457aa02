//! DescribeReservedInstances, DescribeReservedInstancesOfferings and
//! PurchaseReservedInstancesOffering.
//!
//! Each call builds its query parameters, goes through a [`Transport`] and
//! feeds the response to a fresh parser. Parsers never outlive a call.

use crate::aws::{generate_request, Ec2Request, Transport};
use crate::error::Ec2Error;
use crate::prelude::*;
use crate::xml::{self, TagPath, TagPattern, XmlHandler};
use chrono::{DateTime, FixedOffset};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DESCRIBE_RESERVED_INSTANCES: &str = "DescribeReservedInstances";
pub const DESCRIBE_RESERVED_INSTANCES_OFFERINGS: &str = "DescribeReservedInstancesOfferings";
pub const PURCHASE_RESERVED_INSTANCES_OFFERING: &str = "PurchaseReservedInstancesOffering";
pub const DEFAULT_INSTANCE_COUNT: u32 = 1;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReservedInstance {
    pub id: Option<String>,
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    /// Term length in seconds
    pub duration: Option<i64>,
    pub usage_price: Option<f64>,
    pub fixed_price: Option<f64>,
    pub instance_count: Option<i64>,
    pub product_description: Option<String>,
    pub state: Option<String>,
    pub start: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl ReservedInstance {
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(self.start.as_deref()?).ok()
    }

    /// `None` when start or duration is missing, or the term does not fit in a timestamp.
    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        let duration = self.duration.filter(|d| (0..=i64::MAX / 1000).contains(d))?;
        self.start_time()?.checked_add_signed(chrono::Duration::seconds(duration))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReservedInstancesOffering {
    pub id: Option<String>,
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    pub duration: Option<i64>,
    pub usage_price: Option<f64>,
    pub fixed_price: Option<f64>,
    pub product_description: Option<String>,
}

/// Ids to look up and server-side filters for the describe calls.
/// Both empty means "everything visible to the account".
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DescribeOptions {
    pub ids: Vec<String>,
    pub filters: BTreeMap<String, Vec<String>>,
}

impl DescribeOptions {
    pub fn with_ids<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        DescribeOptions { ids: ids.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.entry(name.into()).or_default().push(value.into());
        self
    }

    /// `<id_key>.N` for every id, then `Filter.N.Name` / `Filter.N.Value.M`.
    pub fn to_params(&self, id_key: &str) -> Vec<(String, String)> {
        let ids = self.ids.iter().enumerate().map(|(i, id)| (f!("{id_key}.{}", i + 1), id.clone()));
        let filters = self.filters.iter().enumerate().flat_map(|(n, (name, values))| {
            let n = n + 1;
            std::iter::once((f!("Filter.{n}.Name"), name.clone())).chain(
                values.iter().enumerate().map(move |(m, v)| (f!("Filter.{n}.Value.{}", m + 1), v.clone())),
            )
        });
        ids.chain(filters).collect()
    }
}

pub fn purchase_request(offering_id: &str, instance_count: u32) -> Ec2Request {
    generate_request(
        PURCHASE_RESERVED_INSTANCES_OFFERING,
        [
            ("ReservedInstancesOfferingId", offering_id.to_string()),
            ("InstanceCount", instance_count.to_string()),
        ],
    )
}

/// Collapses any purchase failure into [`Ec2Error::Operation`].
pub fn on_exception(action: &'static str, err: eyre::Report) -> eyre::Report {
    debug!("{action} failed: {err:?}");
    Ec2Error::Operation { action, cause: f!("{err:#}") }.into()
}

pub struct Ec2<T> {
    transport: T,
}

impl<T: Transport> Ec2<T> {
    pub fn new(transport: T) -> Self {
        Ec2 { transport }
    }

    fn request_info<H: XmlHandler>(&self, req: &Ec2Request, parser: H) -> Result<H::Output> {
        let body = self.transport.execute(req)?;
        xml::parse(&body, parser).wrap_err(f!("can't read {} response", req.action))
    }

    fn describe_resources_with_list_and_options<H: XmlHandler>(
        &self,
        action: &str,
        id_key: &str,
        parser: H,
        options: &DescribeOptions,
    ) -> Result<H::Output> {
        let req = generate_request(action, options.to_params(id_key));
        self.request_info(&req, parser)
    }

    pub fn describe_reserved_instances(
        &self,
        options: &DescribeOptions,
    ) -> Result<Vec<ReservedInstance>> {
        self.describe_resources_with_list_and_options(
            DESCRIBE_RESERVED_INSTANCES,
            "ReservedInstancesId",
            ReservedInstancesParser::default(),
            options,
        )
    }

    pub fn describe_reserved_instances_offerings(
        &self,
        options: &DescribeOptions,
    ) -> Result<Vec<ReservedInstancesOffering>> {
        self.describe_resources_with_list_and_options(
            DESCRIBE_RESERVED_INSTANCES_OFFERINGS,
            "ReservedInstancesOfferingId",
            ReservedInstancesOfferingsParser::default(),
            options,
        )
    }

    /// Returns the id of the new reservation.
    pub fn purchase_reserved_instances_offering(
        &self,
        offering_id: &str,
        instance_count: u32,
    ) -> Result<String> {
        let req = purchase_request(offering_id, instance_count);
        let id = self
            .request_info(&req, PurchaseReservedInstancesOfferingParser::default())
            .and_then(|id| {
                ensure!(!id.is_empty(), "response carries no reservedInstancesId");
                Ok(id)
            })
            .map_err(|err| on_exception(PURCHASE_RESERVED_INSTANCES_OFFERING, err))?;
        info!("Purchased {instance_count} x {offering_id} as {id}");
        Ok(id)
    }
}

fn malformed(path: &TagPath, text: &str) -> eyre::Report {
    Ec2Error::Malformed { tag: path.name().to_string(), text: text.to_string() }.into()
}

fn string(text: &str) -> Option<String> {
    Some(text.trim().to_string())
}

// Empty numeric leaves stay unset.
fn int(path: &TagPath, text: &str) -> Result<Option<i64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse().map(Some).map_err(|_| malformed(path, text))
}

fn float(path: &TagPath, text: &str) -> Result<Option<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse().map(Some).map_err(|_| malformed(path, text))
}

const RESERVED_INSTANCES_ITEM: TagPattern = TagPattern::suffix(&["reservedInstancesSet", "item"]);
const TAG_ITEM: TagPattern = TagPattern::suffix(&["tagSet", "item"]);
const TAG_KEY: TagPattern = TagPattern::suffix(&["tagSet", "item", "key"]);
const TAG_VALUE: TagPattern = TagPattern::suffix(&["tagSet", "item", "value"]);

#[derive(Default)]
struct TagPair {
    key: Option<String>,
    value: Option<String>,
}

#[derive(Default)]
pub struct ReservedInstancesParser {
    result: Vec<ReservedInstance>,
    item: Option<ReservedInstance>,
    tag: Option<TagPair>,
}

impl XmlHandler for ReservedInstancesParser {
    type Output = Vec<ReservedInstance>;

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn tag_start(&mut self, path: &TagPath) -> Result<()> {
        if path.matches(&RESERVED_INSTANCES_ITEM) {
            self.item = Some(ReservedInstance::default());
        } else if path.matches(&TAG_ITEM) && self.item.is_some() {
            self.tag = Some(TagPair::default());
        }
        Ok(())
    }

    fn tag_end(&mut self, path: &TagPath, text: &str) -> Result<()> {
        if path.matches(&RESERVED_INSTANCES_ITEM) {
            self.result.extend(self.item.take());
            return Ok(());
        }
        let Some(item) = self.item.as_mut() else {
            return Ok(());
        };
        if path.matches(&TAG_ITEM) {
            if let Some(TagPair { key: Some(key), value }) = self.tag.take() {
                item.tags.insert(key, value.unwrap_or_default());
            }
        } else if path.matches(&TAG_KEY) {
            if let Some(tag) = self.tag.as_mut() {
                tag.key = string(text);
            }
        } else if path.matches(&TAG_VALUE) {
            if let Some(tag) = self.tag.as_mut() {
                tag.value = string(text);
            }
        } else if path.is_child_of(&RESERVED_INSTANCES_ITEM) {
            match path.name() {
                "reservedInstancesId" => item.id = string(text),
                "instanceType" => item.instance_type = string(text),
                "availabilityZone" => item.availability_zone = string(text),
                "duration" => item.duration = int(path, text)?,
                "usagePrice" => item.usage_price = float(path, text)?,
                "fixedPrice" => item.fixed_price = float(path, text)?,
                "instanceCount" => item.instance_count = int(path, text)?,
                "productDescription" => item.product_description = string(text),
                "state" => item.state = string(text),
                "start" => item.start = string(text),
                _ => (),
            }
        }
        Ok(())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }
}

// Items must sit directly under the offerings set so that nested lists such as
// `recurringCharges/item` never open a record of their own.
const OFFERING_ITEM: TagPattern = TagPattern::suffix(&["reservedInstancesOfferingsSet", "item"]);

#[derive(Default)]
pub struct ReservedInstancesOfferingsParser {
    result: Vec<ReservedInstancesOffering>,
    item: Option<ReservedInstancesOffering>,
}

impl XmlHandler for ReservedInstancesOfferingsParser {
    type Output = Vec<ReservedInstancesOffering>;

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn tag_start(&mut self, path: &TagPath) -> Result<()> {
        if path.matches(&OFFERING_ITEM) {
            self.item = Some(ReservedInstancesOffering::default());
        }
        Ok(())
    }

    fn tag_end(&mut self, path: &TagPath, text: &str) -> Result<()> {
        if path.matches(&OFFERING_ITEM) {
            self.result.extend(self.item.take());
            return Ok(());
        }
        let Some(item) = self.item.as_mut().filter(|_| path.is_child_of(&OFFERING_ITEM)) else {
            return Ok(());
        };
        match path.name() {
            "reservedInstancesOfferingId" => item.id = string(text),
            "instanceType" => item.instance_type = string(text),
            "availabilityZone" => item.availability_zone = string(text),
            "duration" => item.duration = int(path, text)?,
            "usagePrice" => item.usage_price = float(path, text)?,
            "fixedPrice" => item.fixed_price = float(path, text)?,
            "productDescription" => item.product_description = string(text),
            _ => (),
        }
        Ok(())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }
}

const PURCHASED_ID: TagPattern =
    TagPattern::anchored(&["PurchaseReservedInstancesOfferingResponse", "reservedInstancesId"]);

#[derive(Default)]
pub struct PurchaseReservedInstancesOfferingParser {
    result: String,
}

impl XmlHandler for PurchaseReservedInstancesOfferingParser {
    type Output = String;

    fn reset(&mut self) {
        self.result = String::new();
    }

    fn tag_end(&mut self, path: &TagPath, text: &str) -> Result<()> {
        if path.matches(&PURCHASED_ID) {
            self.result = string(text).unwrap_or_default();
        }
        Ok(())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }
}
