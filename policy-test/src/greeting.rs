use maplit::{btreemap, convert_args};
use mesh_policy_k8s_api::{
    gateway::{self, Gateway, GatewaySpec},
    virtual_service::{self, VirtualService, VirtualServiceSpec},
    ObjectMeta,
};

/// Gateway resource name shared by every scenario.
pub const GATEWAY_NAME: &str = "greeting-gateway";

/// API path probed through the gateway.
pub const GREETING_PATH: &str = "/api/greeting";

const GREETING_PORT: u16 = 8080;

/// Binds the mesh's ingress workload to plain HTTP on port 80.
pub fn gateway(ns: &str) -> Gateway {
    Gateway {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(GATEWAY_NAME.to_string()),
            ..Default::default()
        },
        spec: GatewaySpec {
            selector: convert_args!(btreemap!(
                "istio" => "ingressgateway",
            )),
            servers: vec![gateway::Server {
                port: gateway::Port {
                    number: 80,
                    name: "http".to_string(),
                    protocol: "HTTP".to_string(),
                },
                hosts: vec!["*".to_string()],
            }],
        },
    }
}

/// Routes all gateway traffic to the workload.
pub fn virtual_service(ns: &str, workload: &str) -> VirtualService {
    VirtualService {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(workload.to_string()),
            ..Default::default()
        },
        spec: VirtualServiceSpec {
            hosts: vec!["*".to_string()],
            gateways: vec![GATEWAY_NAME.to_string()],
            http: vec![virtual_service::HttpRoute {
                matches: vec![virtual_service::HttpMatchRequest {
                    uri: Some(virtual_service::StringMatch::Prefix("/".to_string())),
                }],
                route: vec![virtual_service::HttpRouteDestination {
                    destination: virtual_service::Destination {
                        host: workload.to_string(),
                        port: Some(virtual_service::PortSelector {
                            number: GREETING_PORT,
                        }),
                    },
                }],
            }],
        },
    }
}
