//! Template rendering.
//!
//! The production renderer is an external collaborator; `JsonTemplateRenderer`
//! is the built-in one. It emits a JSON template whose `Metadata` carries the
//! manifest and template version, which the diff reporter ignores.

use crate::stack::StackConfig;
use crate::CoreError;
use rollout_remote::StackPayload;
use rollout_schema::{ContainerConfig, ServiceManifest};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const APP_TAG: &str = "rollout-application";
pub const ENV_TAG: &str = "rollout-environment";
pub const SERVICE_TAG: &str = "rollout-service";

/// Version stamped into every rendered template's metadata.
pub const TEMPLATE_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, config: &StackConfig) -> Result<String, CoreError>;
}

pub struct JsonTemplateRenderer;

/// `api-gateway` -> `ApiGateway`, usable as a logical id.
fn logical_id(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect()
}

fn image_for(config: &StackConfig, container: &str, location: Option<&str>) -> String {
    config
        .runtime
        .images
        .get(container)
        .map(crate::stack::ContainerImage::reference)
        .or_else(|| location.map(str::to_owned))
        .unwrap_or_default()
}

fn container_definitions(config: &StackConfig, container: &ContainerConfig) -> Vec<Value> {
    let workload = &config.identity.name;
    let mut defs = Vec::new();

    let mut main = json!({
        "Name": workload,
        "Image": image_for(config, workload, container.image.location.as_deref()),
        "Environment": container.variables,
    });
    if let Some(port) = container.image.port {
        main["PortMappings"] = json!([{ "ContainerPort": port }]);
    }
    defs.push(main);

    for (name, sidecar) in &container.sidecars {
        defs.push(json!({
            "Name": name,
            "Image": image_for(config, name, sidecar.image.location.as_deref()),
        }));
    }
    if let Some(logging) = &container.logging {
        defs.push(json!({
            "Name": rollout_schema::LOG_ROUTER_CONTAINER,
            "Image": logging.image.clone().unwrap_or_default(),
        }));
    }

    for def in &mut defs {
        let name = def["Name"].as_str().unwrap_or_default().to_owned();
        if let Some(arn) = config.runtime.env_file_arns.get(&name) {
            def["EnvironmentFiles"] = json!([{ "Type": "s3", "Value": arn }]);
        }
    }
    defs
}

fn ecs_resources(config: &StackConfig, container: &ContainerConfig, resources: &mut Map<String, Value>) {
    resources.insert(
        "TaskDefinition".to_owned(),
        json!({
            "Type": "AWS::ECS::TaskDefinition",
            "Properties": { "ContainerDefinitions": container_definitions(config, container) },
        }),
    );
    resources.insert(
        "Service".to_owned(),
        json!({
            "Type": "AWS::ECS::Service",
            "Properties": {
                "TaskDefinition": { "Ref": "TaskDefinition" },
                "ServiceRegistries": [{ "Namespace": config.runtime.service_discovery_endpoint }],
            },
        }),
    );
}

fn listener_rules(config: &StackConfig, http: &rollout_schema::HttpConfig, resources: &mut Map<String, Value>) {
    for (idx, (_, rule)) in http.labeled_rules().into_iter().enumerate() {
        let id = if idx == 0 {
            "HTTPListenerRule".to_owned()
        } else {
            format!("HTTPListenerRule{idx}")
        };
        resources.insert(
            id,
            json!({
                "Type": "AWS::ElasticLoadBalancingV2::ListenerRule",
                "Properties": {
                    "PathPattern": rule.path,
                    "HostHeaders": rule.alias.names(),
                    "RedirectToHTTPS": rule.redirects_to_https(),
                    "HTTPS": config.options.https,
                },
            }),
        );
    }
}

fn resources(config: &StackConfig) -> Map<String, Value> {
    let mut resources = Map::new();
    if let Some(container) = config.manifest.workload.container() {
        match &config.manifest.workload {
            ServiceManifest::RequestDrivenWebService(_) => {}
            _ => ecs_resources(config, container, &mut resources),
        }
    }

    match &config.manifest.workload {
        ServiceManifest::LoadBalancedWebService(svc) => {
            if let Some(http) = &svc.http {
                listener_rules(config, http, &mut resources);
            }
            if let Some(nlb) = &svc.nlb {
                resources.insert(
                    "NetworkLoadBalancer".to_owned(),
                    json!({
                        "Type": "AWS::ElasticLoadBalancingV2::LoadBalancer",
                        "Properties": {
                            "Port": nlb.port,
                            "Aliases": nlb.alias.names(),
                            "AllowedCIDRs": config.options.public_cidr_blocks,
                        },
                    }),
                );
            }
        }
        ServiceManifest::BackendService(svc) => {
            if let Some(http) = &svc.http {
                listener_rules(config, http, &mut resources);
            }
        }
        ServiceManifest::RequestDrivenWebService(svc) => {
            resources.insert(
                "Service".to_owned(),
                json!({
                    "Type": "AWS::AppRunner::Service",
                    "Properties": {
                        "Image": image_for(config, &config.identity.name, svc.container.image.location.as_deref()),
                        "Port": svc.container.image.port,
                        "EnvironmentVariables": svc.container.variables,
                    },
                }),
            );
            if let Some(alias) = svc.http.alias.as_deref().filter(|a| !a.is_empty()) {
                resources.insert(
                    "CustomDomain".to_owned(),
                    json!({
                        "Type": "Custom::CustomDomain",
                        "Properties": { "DomainName": alias },
                    }),
                );
            }
        }
        ServiceManifest::WorkerService(_) => {
            resources.insert(
                "EventsQueue".to_owned(),
                json!({ "Type": "AWS::SQS::Queue" }),
            );
            for sub in &config.subscriptions {
                resources.insert(
                    format!("{}Subscription", logical_id(&sub.topic_name)),
                    json!({
                        "Type": "AWS::SNS::Subscription",
                        "Properties": {
                            "TopicArn": sub.topic_arn,
                            "Protocol": "sqs",
                            "DedicatedQueue": sub.queue,
                        },
                    }),
                );
            }
        }
        ServiceManifest::ScheduledJob(job) => {
            resources.insert(
                "Rule".to_owned(),
                json!({
                    "Type": "AWS::Events::Rule",
                    "Properties": { "ScheduleExpression": job.on.schedule },
                }),
            );
        }
        ServiceManifest::StaticSite(site) => {
            resources.insert(
                "Bucket".to_owned(),
                json!({ "Type": "AWS::S3::Bucket" }),
            );
            resources.insert(
                "AssetMapping".to_owned(),
                json!({
                    "Type": "Custom::TriggerStateMachine",
                    "Properties": {
                        "MappingURL": config.runtime.static_asset_mapping_url,
                        "Alias": site.http.alias,
                    },
                }),
            );
        }
    }

    for (name, url) in &config.runtime.custom_resource_urls {
        resources.insert(
            name.clone(),
            json!({
                "Type": "AWS::Lambda::Function",
                "Properties": { "CodeURL": url },
            }),
        );
    }
    if let Some(url) = &config.runtime.addons_url {
        resources.insert(
            "AddonsStack".to_owned(),
            json!({
                "Type": "AWS::CloudFormation::Stack",
                "Properties": { "TemplateURL": url },
            }),
        );
    }
    resources
}

/// Parameter values passed alongside the template.
pub fn parameter_values(config: &StackConfig) -> BTreeMap<String, String> {
    let id = &config.identity;
    let mut params = BTreeMap::from([
        ("AppName".to_owned(), id.app.clone()),
        ("EnvName".to_owned(), id.env.clone()),
        ("WorkloadName".to_owned(), id.name.clone()),
        (
            "AddonsTemplateURL".to_owned(),
            config.runtime.addons_url.clone().unwrap_or_default(),
        ),
    ]);
    if let Some(container) = config.manifest.workload.container() {
        params.insert(
            "ContainerImage".to_owned(),
            image_for(config, &id.name, container.image.location.as_deref()),
        );
        if let Some(port) = container.image.port {
            params.insert("ContainerPort".to_owned(), port.to_string());
        }
        params.insert(
            "EnvFileARN".to_owned(),
            config
                .runtime
                .env_file_arns
                .get(&id.name)
                .map(ToString::to_string)
                .unwrap_or_default(),
        );
    }
    params
}

impl TemplateRenderer for JsonTemplateRenderer {
    fn render(&self, config: &StackConfig) -> Result<String, CoreError> {
        let manifest = serde_yaml::to_string(&config.manifest)?;
        let parameters: Map<String, Value> = parameter_values(config)
            .into_keys()
            .map(|k| (k, json!({ "Type": "String" })))
            .collect();
        let template = json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Description": format!(
                "{} {} for application {}",
                config.kind(),
                config.identity.name,
                config.identity.app
            ),
            "Metadata": {
                "Version": TEMPLATE_VERSION,
                "Manifest": manifest,
            },
            "Parameters": parameters,
            "Resources": resources(config),
        });
        Ok(serde_json::to_string_pretty(&template)?)
    }
}

/// Bundle a rendered template with its parameters and tags. Reserved tags
/// override user tags of the same key.
pub fn stack_payload(config: &StackConfig, template: String) -> StackPayload {
    let mut tags = config.runtime.tags.clone();
    tags.insert(APP_TAG.to_owned(), config.identity.app.clone());
    tags.insert(ENV_TAG.to_owned(), config.identity.env.clone());
    tags.insert(SERVICE_TAG.to_owned(), config.identity.name.clone());
    StackPayload {
        name: config.stack_name(),
        template,
        parameters: parameter_values(config),
        tags,
        permissions_boundary: config.permissions_boundary.clone(),
    }
}
