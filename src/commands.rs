use crate::aws::Transport;
use crate::config::Config;
use crate::prelude::*;
use crate::reserved_instances::{
    purchase_request, DescribeOptions, Ec2, ReservedInstance, DEFAULT_INSTANCE_COUNT,
};
use clap::{Args, Subcommand};
use dialoguer::Confirm;
use itertools::Itertools;
use serde::Serialize;

#[derive(Args, Clone, Debug, Default)]
pub struct DescribeArgs {
    /// Ids to describe (all when empty)
    pub ids: Vec<String>,
    /// Server side filter, e.g. 'availability-zone=us-east-1a' (repeatable)
    #[arg(short, long = "filter", value_name = "NAME=VALUE", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,
}

impl From<&DescribeArgs> for DescribeOptions {
    fn from(DescribeArgs { ids, filters }: &DescribeArgs) -> Self {
        filters
            .iter()
            .fold(DescribeOptions::with_ids(ids.iter().cloned()), |opts, (name, value)| {
                opts.filter(name.as_str(), value.as_str())
            })
    }
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| f!("invalid filter {s:?}, expected NAME=VALUE"))
}

#[derive(Serialize)]
struct ReservedInstanceRow<'a> {
    #[serde(flatten)]
    reservation: &'a ReservedInstance,
    end: Option<String>,
}

impl<'a> From<&'a ReservedInstance> for ReservedInstanceRow<'a> {
    fn from(reservation: &'a ReservedInstance) -> Self {
        let end = reservation.end_time().map(|t| t.to_rfc3339());
        ReservedInstanceRow { reservation, end }
    }
}

#[derive(Args, Clone, Debug)]
pub struct PurchaseArgs {
    /// Offering to buy (see 'ec2ri offerings')
    pub offering_id: String,
    /// Number of instances to reserve
    #[arg(short, long, default_value_t = DEFAULT_INSTANCE_COUNT)]
    pub count: u32,
    /// Don't ask for confirmation
    #[arg(short, long, default_value_t)]
    pub yes: bool,
    /// Print the request instead of sending it
    #[arg(long, default_value_t)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List owned reserved instances
    #[command()]
    Describe(DescribeArgs),
    /// List reserved instances offerings available for purchase
    #[command()]
    Offerings(DescribeArgs),
    /// Purchase a reserved instances offering
    #[command(arg_required_else_help = true)]
    Purchase(PurchaseArgs),
    /// Generate shell completions
    #[command(arg_required_else_help = true)]
    Completions {
        shell: clap_complete::Shell,
    },
}

impl Commands {
    pub fn describe(args: &DescribeArgs, ec2: &Ec2<impl Transport>) -> Result<()> {
        let res = ec2.describe_reserved_instances(&args.into())?;
        let rows = res.iter().map(ReservedInstanceRow::from).collect_vec();
        p!("{}", serde_json::to_string_pretty(&rows)?);
        Ok(())
    }

    pub fn offerings(args: &DescribeArgs, ec2: &Ec2<impl Transport>) -> Result<()> {
        let res = ec2.describe_reserved_instances_offerings(&args.into())?;
        p!("{}", serde_json::to_string_pretty(&res)?);
        Ok(())
    }

    pub fn dry_run(PurchaseArgs { offering_id, count, .. }: &PurchaseArgs) {
        p!("{}", purchase_request(offering_id, *count));
    }

    pub fn purchase(args: &PurchaseArgs, cfg: &Config, ec2: &Ec2<impl Transport>) -> Result<()> {
        let PurchaseArgs { offering_id, count, yes, .. } = args;
        if cfg.confirm_purchase && !yes {
            let confirmed = Confirm::new()
                .with_prompt(f!("Purchase {count} x {offering_id}? This can't be undone"))
                .default(false)
                .interact()?;
            if !confirmed {
                p!("Purchase cancelled");
                return Ok(());
            }
        }
        let id = ec2.purchase_reserved_instances_offering(offering_id, *count)?;
        p!("{id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_split_on_first_equal_sign() {
        assert_eq!(
            parse_filter("tag:env=a=b").unwrap(),
            ("tag:env".to_string(), "a=b".to_string())
        );
        assert!(parse_filter("no-value").is_err());
        assert!(parse_filter("=x").is_err());
    }

    #[test]
    fn describe_args_become_options() {
        let args = DescribeArgs {
            ids: vec!["ri-1".into()],
            filters: vec![
                ("state".into(), "active".into()),
                ("state".into(), "retired".into()),
            ],
        };
        let options = DescribeOptions::from(&args);
        assert_eq!(options.ids, vec!["ri-1"]);
        assert_eq!(options.filters["state"], vec!["active", "retired"]);
    }

    #[test]
    fn dry_run_shows_the_action() {
        let text = purchase_request("i-offer-1", 3).to_string();
        assert!(text.starts_with("Action=PurchaseReservedInstancesOffering\n"));
        assert!(text.lines().any(|l| l == "InstanceCount=3"));
        assert!(text.lines().any(|l| l == "ReservedInstancesOfferingId=i-offer-1"));
    }

    #[test]
    fn rows_carry_the_end_of_the_term() {
        let reservation = ReservedInstance {
            id: Some("1ba8e2e3".into()),
            start: Some("2009-12-18T20:39:39Z".into()),
            duration: Some(31536000),
            ..ReservedInstance::default()
        };
        let json = serde_json::to_value(ReservedInstanceRow::from(&reservation)).unwrap();
        assert_eq!(json["id"], "1ba8e2e3");
        assert_eq!(json["end"], "2010-12-18T20:39:39+00:00");
    }
}
