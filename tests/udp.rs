use kadmesh::rpc::UdpTransport;
use kadmesh::{Address, Node};

fn udp_node() -> Node {
    let transport = UdpTransport::bind("127.0.0.1:0").unwrap();

    Node::builder()
        .transport(Box::new(transport))
        .build()
        .unwrap()
}

#[test]
fn put_get_over_udp() {
    let a = udp_node();
    let b = udp_node();

    let b_contact = b.info().unwrap().contact().clone();

    match b_contact.address() {
        Address::AddressPort { address, port } => {
            assert_eq!(address, "127.0.0.1");
            assert_ne!(*port, 0);
        }
        Address::Nickname(_) => panic!("expected an address/port contact"),
    }

    a.connect(b_contact).unwrap();

    assert_eq!(b.info().unwrap().routing_table_size(), 1);

    assert_eq!(a.put("beep", "boop").unwrap(), 1);

    assert_eq!(b.info().unwrap().stored_items(), 1);
    assert_eq!(b.get("beep").unwrap(), "boop");
    assert_eq!(a.get("beep").unwrap(), "boop");
}
